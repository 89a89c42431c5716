use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gpioport::{
    ControllerConfig, Credentials, ErrorKind, GpioController, GpioService, PortWrapper,
    Registration, ServiceConfig, SysfsFilesystem,
};
use tempfile::TempDir;

/// A directory laid out like `/sys/class/gpio` with `gpio` already present.
fn fake_sysfs(gpio: u32) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("export"), b"").expect("export file");
    let line = dir.path().join(format!("gpio{gpio}"));
    fs::create_dir(&line).expect("line dir");
    fs::write(line.join("direction"), b"").expect("direction file");
    fs::write(line.join("edge"), b"").expect("edge file");
    fs::write(line.join("value"), b"0\n").expect("value file");
    dir
}

fn controller(root: &Path) -> GpioController<SysfsFilesystem> {
    let _ = env_logger::builder().is_test(true).try_init();
    GpioController::new(
        ControllerConfig {
            sysfs_root: root.to_path_buf(),
            strict_writes: false,
        },
        Arc::new(SysfsFilesystem::new()),
    )
    .expect("valid controller config")
}

fn service_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        controller: ControllerConfig {
            sysfs_root: root.to_path_buf(),
            strict_writes: true,
        },
        consumer: "sysfs-test".into(),
        ..ServiceConfig::default()
    }
}

#[test]
fn writes_land_in_attribute_files() {
    let sysfs = fake_sysfs(17);
    let ctl = controller(sysfs.path());

    let mut handle = ctl.open_line(17, "out").expect("line opens");

    assert_eq!(fs::read(sysfs.path().join("export")).unwrap(), b"17");
    assert_eq!(
        fs::read(sysfs.path().join("gpio17/direction")).unwrap(),
        b"out\0"
    );
    assert_eq!(
        fs::read(sysfs.path().join("gpio17/edge")).unwrap(),
        b"falling\0"
    );

    let mut value = String::new();
    handle.read_to_string(&mut value).expect("value readable");
    assert_eq!(value, "0\n");
}

#[test]
fn value_handle_is_read_write() {
    let sysfs = fake_sysfs(3);
    let ctl = controller(sysfs.path());

    let mut handle = ctl.open_line(3, "out").expect("line opens");
    std::io::Write::write_all(&mut handle, b"1").expect("value writable");
    handle.seek(SeekFrom::Start(0)).expect("seekable");

    let mut value = String::new();
    handle.read_to_string(&mut value).expect("value readable");
    assert_eq!(value, "1\n");
}

#[test]
fn opening_twice_succeeds() {
    let sysfs = fake_sysfs(21);
    let ctl = controller(sysfs.path());

    ctl.open_line(21, "in").expect("first open");
    ctl.open_line(21, "in").expect("second open");
}

#[test]
fn missing_export_file_is_export_unavailable() {
    let sysfs = fake_sysfs(5);
    fs::remove_file(sysfs.path().join("export")).unwrap();
    let ctl = controller(sysfs.path());

    let err = ctl.open_line(5, "in").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExportUnavailable);
    assert_eq!(
        fs::read(sysfs.path().join("gpio5/direction")).unwrap(),
        b""
    );
}

#[test]
fn unexported_line_is_direction_unavailable() {
    let sysfs = fake_sysfs(5);
    let ctl = controller(sysfs.path());

    let err = ctl.open_line(6, "in").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DirectionUnavailable);
    assert_eq!(fs::read(sysfs.path().join("export")).unwrap(), b"6");
}

#[test]
fn missing_edge_file_leaves_value_untouched() {
    let sysfs = fake_sysfs(5);
    fs::remove_file(sysfs.path().join("gpio5/edge")).unwrap();
    let ctl = controller(sysfs.path());

    let err = ctl.open_line(5, "in").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EdgeUnavailable);
    assert_eq!(
        fs::read(sysfs.path().join("gpio5/direction")).unwrap(),
        b"in\0"
    );
}

#[test]
fn missing_value_file_is_value_open_failed() {
    let sysfs = fake_sysfs(5);
    fs::remove_file(sysfs.path().join("gpio5/value")).unwrap();
    let ctl = controller(sysfs.path());

    let err = ctl.open_line(5, "in").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOpenFailed);
    assert!(!sysfs.path().join("gpio5/value").exists());
}

#[test]
fn port_reads_and_writes_levels() {
    let sysfs = fake_sysfs(26);
    let cfg = service_config(sysfs.path());
    let registration = Registration::new(cfg.consumer.clone());
    let service = GpioService::new(
        &cfg,
        Arc::new(SysfsFilesystem::new()),
        PortWrapper,
        &registration,
    )
    .expect("service builds");

    let mut port = service
        .open_gpio_port(Credentials::new(0), 26, "out")
        .expect("port opens");
    assert_eq!(port.gpio(), 26);
    assert_eq!(port.consumer(), "sysfs-test");

    let value_path = sysfs.path().join("gpio26/value");
    let meta = fs::metadata(&value_path).unwrap();
    assert_eq!(port.identity(), (meta.dev(), meta.ino()));

    assert!(!port.read_level().expect("read level"));
    port.write_level(true).expect("write level");
    assert!(port.read_level().expect("read level"));
    assert_eq!(fs::read(&value_path).unwrap(), b"1\n");
}

#[test]
fn port_descriptor_can_be_taken() {
    let sysfs = fake_sysfs(2);
    let cfg = service_config(sysfs.path());
    let registration = Registration::new(cfg.consumer.clone());
    let service = GpioService::new(
        &cfg,
        Arc::new(SysfsFilesystem::new()),
        PortWrapper,
        &registration,
    )
    .expect("service builds");

    let port = service
        .open_gpio_port(Credentials::new(0), 2, "in")
        .expect("port opens");
    let mut file = File::from(port.into_owned_fd());

    let mut value = String::new();
    file.read_to_string(&mut value).expect("value readable");
    assert_eq!(value, "0\n");
}

#[test]
fn wait_for_edge_times_out_without_an_edge() {
    let sysfs = fake_sysfs(12);
    let cfg = service_config(sysfs.path());
    let registration = Registration::new(cfg.consumer.clone());
    let service = GpioService::new(
        &cfg,
        Arc::new(SysfsFilesystem::new()),
        PortWrapper,
        &registration,
    )
    .expect("service builds");

    let mut port = service
        .open_gpio_port(Credentials::new(0), 12, "in")
        .expect("port opens");
    assert!(!port.read_level().expect("read level"));
    // A regular file never raises POLLPRI, so the wait runs out.
    let level = port
        .wait_for_edge(Some(Duration::from_millis(20)))
        .expect("poll succeeds");
    assert_eq!(level, None);
}
