use dzapd::adapters::{CommandOutput, SimulatedCommander, SystemCommander};
use dzapd::core::engine::WipeConfig;
use dzapd::core::{Inventory, JobSupervisor, ProgressEvent, ProgressSink, SanitizeEngine};
use dzapd::error::WipeError;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const LSBLK_LINE: &str = "lsblk -J -b -o NAME,MODEL,SIZE,ROTA,TYPE,MOUNTPOINTS,FSTYPE,TRAN";

fn engine_with(sim: &SimulatedCommander) -> (Arc<SanitizeEngine>, Arc<JobSupervisor>) {
    let commander: Arc<dyn SystemCommander> = Arc::new(sim.clone());
    let inventory = Arc::new(Inventory::new(commander.clone()));
    let supervisor = Arc::new(JobSupervisor::new());
    let engine = Arc::new(SanitizeEngine::new(commander, inventory, supervisor.clone()));
    (engine, supervisor)
}

/// lsblk fixture describing a file-backed device. Absolute names are
/// used as the device node verbatim, so the engine writes to the file.
fn lsblk_for_file(path: &str, size: u64, rota: bool, mountpoint: Option<&str>) -> String {
    let mounts = match mountpoint {
        Some(mp) => format!(r#"["{mp}"]"#),
        None => "[null]".to_string(),
    };
    format!(
        r#"{{"blockdevices":[{{"name":"{path}","model":"FIXTURE DISK","size":{size},"rota":{rota},"type":"disk","mountpoints":{mounts},"fstype":null,"tran":"sata"}}]}}"#
    )
}

fn wipe_config(path: &str, method: &str) -> WipeConfig {
    WipeConfig {
        device_path: path.to_string(),
        method: method.to_string(),
        device_serial: None,
        device_type: None,
        device_model: None,
    }
}

fn fixture_file(size: usize, fill: u8) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    fs::write(file.path(), vec![fill; size]).unwrap();
    file
}

async fn drain(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .map_err(|_| ())
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn one_pass_overwrite_zeroes_the_device() {
    let size = 256 * 1024;
    let file = fixture_file(size, 0xAB);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size as u64, true, None)),
    );

    let (engine, supervisor) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    engine
        .run(wipe_config(&path, "overwrite_1_pass"), sink)
        .await
        .unwrap();

    let events = drain(rx).await;
    let last = events.last().unwrap();
    assert_eq!(last.status, "done");
    assert_eq!(last.percent, 100.0);

    let contents = fs::read(file.path()).unwrap();
    assert_eq!(contents.len(), size);
    assert!(contents.iter().all(|&b| b == 0x00));

    assert_eq!(supervisor.active_count(), 0);
}

#[tokio::test]
async fn three_pass_overwrite_ends_on_third_pattern() {
    let size = 128 * 1024;
    let file = fixture_file(size, 0x00);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size as u64, true, None)),
    );

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    engine
        .run(wipe_config(&path, "overwrite_3_pass"), sink)
        .await
        .unwrap();

    // Pass schedule is 0x00, 0xFF, 0x55; the device ends on the last.
    let contents = fs::read(file.path()).unwrap();
    assert!(contents.iter().all(|&b| b == 0x55));

    // Percent is non-decreasing up to the terminal event.
    let events = drain(rx).await;
    let percents: Vec<f64> = events.iter().map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(*percents.last().unwrap(), 100.0);
}

#[tokio::test]
async fn two_pass_overwrite_uses_pattern_and_complement() {
    let size = 128 * 1024;
    let file = fixture_file(size, 0x00);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    // USB-class fixture: transport usb permits overwrite_2_pass
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(format!(
            r#"{{"blockdevices":[{{"name":"{path}","size":{size},"rota":false,"type":"disk","mountpoints":[null],"tran":"usb"}}]}}"#
        )),
    );

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    engine
        .run(wipe_config(&path, "overwrite_2_pass"), sink)
        .await
        .unwrap();

    let contents = fs::read(file.path()).unwrap();
    assert!(contents.iter().all(|&b| b == 0xAA));

    let events = drain(rx).await;
    let p1 = events
        .iter()
        .position(|e| e.status.contains("Pattern: 0x55"))
        .unwrap();
    let p2 = events
        .iter()
        .position(|e| e.status.contains("Pattern: 0xAA"))
        .unwrap();
    assert!(p1 < p2);
}

#[tokio::test]
async fn mounted_device_is_refused_before_any_write() {
    let size = 128 * 1024;
    let file = fixture_file(size, 0xAB);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size as u64, true, Some("/mnt/data"))),
    );

    let (engine, supervisor) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let err = engine
        .run(wipe_config(&path, "overwrite_1_pass"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::SafetyRefusal(_)));

    // No write happened and the terminal event carries the error.
    let contents = fs::read(file.path()).unwrap();
    assert!(contents.iter().all(|&b| b == 0xAB));

    let events = drain(rx).await;
    assert_eq!(events.last().unwrap().status, "error");
    assert_eq!(supervisor.active_count(), 0);
}

#[tokio::test]
async fn os_disk_is_refused_for_every_method() {
    let size = 128 * 1024;
    let file = fixture_file(size, 0xAB);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size as u64, true, Some("/"))),
    );

    let (engine, _) = engine_with(&sim);

    for method in ["overwrite_1_pass", "overwrite_3_pass"] {
        let (sink, _rx) = ProgressSink::new(64);
        let err = engine
            .run(wipe_config(&path, method), sink)
            .await
            .unwrap_err();
        assert!(matches!(err, WipeError::SafetyRefusal(_)));
    }
}

#[tokio::test]
async fn frozen_ssd_refuses_firmware_erase() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"sdb","model":"Frozen SSD","size":500107862016,"rota":false,"type":"disk","mountpoints":[null],"tran":"sata"}]}"#,
        ),
    );
    sim.script(
        "hdparm -I /dev/sdb",
        CommandOutput::ok("ATA device\n   Security:  enabled, frozen\n"),
    );

    let (engine, _) = engine_with(&sim);
    let (sink, _rx) = ProgressSink::new(64);

    let err = engine
        .run(wipe_config("/dev/sdb", "sata_secure_erase"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::SafetyRefusal(_)));

    // The erase was never issued.
    assert!(
        sim.calls()
            .iter()
            .all(|line| !line.contains("--security-erase"))
    );
}

#[tokio::test]
async fn method_not_in_whitelist_is_refused() {
    let size = 128 * 1024;
    let file = fixture_file(size, 0xAB);
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size as u64, true, None)),
    );

    let (engine, _) = engine_with(&sim);

    // HDD never gets the two-pass removable-media schedule.
    let (sink, _rx) = ProgressSink::new(64);
    let err = engine
        .run(wipe_config(&path, "overwrite_2_pass"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::SafetyRefusal(_)));

    // Unknown method ids are a lookup miss.
    let (sink, _rx) = ProgressSink::new(64);
    let err = engine
        .run(wipe_config(&path, "gutmann_35_pass"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::NotFound(_)));
}

#[tokio::test]
async fn nvme_format_reports_done_without_byte_progress() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"nvme0n1","model":"KINGSTON NV2","size":250059350016,"rota":false,"type":"disk","mountpoints":[null],"tran":"nvme"}]}"#,
        ),
    );
    sim.script("nvme format /dev/nvme0n1 -s 1", CommandOutput::ok(""));

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    engine
        .run(wipe_config("/dev/nvme0n1", "nvme_format"), sink)
        .await
        .unwrap();

    let events = drain(rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, "Executing NVMe Format...");
    assert_eq!(events[1].status, "done");
    assert!(events.iter().all(|e| e.bytes_written == 0));
}

#[tokio::test]
async fn secure_erase_sets_password_before_erasing() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"sdc","model":"Plain SSD","size":500107862016,"rota":false,"type":"disk","mountpoints":[null],"tran":"sata"}]}"#,
        ),
    );
    sim.script("hdparm -I /dev/sdc", CommandOutput::ok("Security:\n"));
    sim.script(
        "hdparm --user-master user --security-set-pass dzap /dev/sdc",
        CommandOutput::ok(""),
    );
    sim.script(
        "hdparm --user-master user --security-erase dzap /dev/sdc",
        CommandOutput::ok(""),
    );

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    engine
        .run(wipe_config("/dev/sdc", "sata_secure_erase"), sink)
        .await
        .unwrap();

    let calls = sim.calls();
    let set_pass = calls
        .iter()
        .position(|c| c.contains("--security-set-pass"))
        .unwrap();
    let erase = calls
        .iter()
        .position(|c| c.contains("--security-erase"))
        .unwrap();
    assert!(set_pass < erase);

    assert_eq!(drain(rx).await.last().unwrap().status, "done");
}

#[tokio::test]
async fn failed_password_set_aborts_before_erase() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"sdc","model":"Plain SSD","size":500107862016,"rota":false,"type":"disk","mountpoints":[null],"tran":"sata"}]}"#,
        ),
    );
    sim.script("hdparm -I /dev/sdc", CommandOutput::ok("Security:\n"));
    sim.script(
        "hdparm --user-master user --security-set-pass dzap /dev/sdc",
        CommandOutput::failed("SG_IO: bad/missing sense data"),
    );

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let err = engine
        .run(wipe_config("/dev/sdc", "sata_secure_erase"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::ExternalTool { .. }));

    assert!(
        sim.calls()
            .iter()
            .all(|line| !line.contains("--security-erase"))
    );
    assert_eq!(drain(rx).await.last().unwrap().status, "error");
}

#[tokio::test]
async fn android_factory_reset_returns_after_reboot_command() {
    let sim = SimulatedCommander::new();
    sim.script(
        "adb devices",
        CommandOutput::ok("List of devices attached\nR58M123ABC\tdevice\n"),
    );
    sim.script(
        "adb -s R58M123ABC shell getprop ro.product.model",
        CommandOutput::ok("Pixel 6\n"),
    );
    sim.script("adb -s R58M123ABC reboot recovery", CommandOutput::ok(""));

    let (engine, _) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let config = WipeConfig {
        device_path: String::new(),
        method: "android_factory_reset".to_string(),
        device_serial: Some("R58M123ABC".to_string()),
        device_type: Some("Android".to_string()),
        device_model: Some("Pixel 6".to_string()),
    };
    engine.run(config, sink).await.unwrap();

    let events = drain(rx).await;
    assert_eq!(events.last().unwrap().status, "done");
    assert!(sim.calls().contains(&"adb -s R58M123ABC reboot recovery".to_string()));
}

#[tokio::test]
async fn abort_during_firmware_command_kills_the_job() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"nvme0n1","size":250059350016,"rota":false,"type":"disk","mountpoints":[null],"tran":"nvme"}]}"#,
        ),
    );
    sim.script("nvme format /dev/nvme0n1 -s 1", CommandOutput::ok(""));
    sim.script_delay("nvme format /dev/nvme0n1 -s 1", Duration::from_secs(30));

    let (engine, supervisor) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(wipe_config("/dev/nvme0n1", "nvme_format"), sink).await })
    };

    // Wait for the job to register, then abort it.
    timeout(Duration::from_secs(2), async {
        while supervisor.state("/dev/nvme0n1").is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    supervisor.abort("/dev/nvme0n1").unwrap();

    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(WipeError::Aborted)));

    let events = drain(rx).await;
    assert_eq!(events.last().unwrap().status, "aborted");
    assert_eq!(supervisor.active_count(), 0);

    // The identity is accepted again after the terminal state.
    supervisor.register("/dev/nvme0n1", "nvme_format").unwrap();
}

#[tokio::test]
async fn abort_during_overwrite_is_observed_at_a_write_boundary() {
    let size = 64 * 1024 * 1024;
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(size).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size, true, None)),
    );

    let (engine, supervisor) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let handle = {
        let engine = engine.clone();
        let path = path.clone();
        tokio::spawn(async move { engine.run(wipe_config(&path, "overwrite_1_pass"), sink).await })
    };

    timeout(Duration::from_secs(2), async {
        while supervisor.state(&path).is_none() {
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
    })
    .await
    .unwrap();
    supervisor.abort(&path).unwrap();

    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(WipeError::Aborted)));
    assert_eq!(drain(rx).await.last().unwrap().status, "aborted");
    assert_eq!(supervisor.active_count(), 0);
}

#[tokio::test]
async fn second_wipe_for_an_active_identity_is_rejected() {
    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(
            r#"{"blockdevices":[{"name":"nvme0n1","size":250059350016,"rota":false,"type":"disk","mountpoints":[null],"tran":"nvme"}]}"#,
        ),
    );
    sim.script("nvme format /dev/nvme0n1 -s 1", CommandOutput::ok(""));
    sim.script_delay("nvme format /dev/nvme0n1 -s 1", Duration::from_secs(30));

    let (engine, supervisor) = engine_with(&sim);

    let (sink, _rx) = ProgressSink::new(64);
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(wipe_config("/dev/nvme0n1", "nvme_format"), sink).await })
    };

    timeout(Duration::from_secs(2), async {
        while supervisor.state("/dev/nvme0n1").is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    let (sink, _rx2) = ProgressSink::new(64);
    let err = engine
        .run(wipe_config("/dev/nvme0n1", "nvme_format"), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WipeError::JobActive(_)));

    supervisor.abort("/dev/nvme0n1").unwrap();
    let _ = timeout(Duration::from_secs(2), first).await.unwrap();
}

#[tokio::test]
async fn paused_job_resumes_and_completes() {
    let size = 8 * 1024 * 1024;
    let file = tempfile::NamedTempFile::new().unwrap();
    file.as_file().set_len(size).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let sim = SimulatedCommander::new();
    sim.script(
        LSBLK_LINE,
        CommandOutput::ok(lsblk_for_file(&path, size, true, None)),
    );

    let (engine, supervisor) = engine_with(&sim);
    let (sink, rx) = ProgressSink::new(64);

    let handle = {
        let engine = engine.clone();
        let path = path.clone();
        tokio::spawn(async move { engine.run(wipe_config(&path, "overwrite_1_pass"), sink).await })
    };

    timeout(Duration::from_secs(2), async {
        while supervisor.state(&path).is_none() {
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
    })
    .await
    .unwrap();

    // Toggle pause on, then off again; the job must still finish.
    if supervisor.pause(&path).is_ok() {
        let _ = supervisor.resume(&path);
    }

    let result = timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(drain(rx).await.last().unwrap().status, "done");

    let contents = fs::read(file.path()).unwrap();
    assert!(contents.iter().all(|&b| b == 0x00));
}
