use log::info;
use std::io;
use std::sync::Arc;

use gpioport::{Credentials, GpioService, PortWrapper, Registration, ServiceConfig, SysfsFilesystem};

fn usage() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "usage: gpioport <gpio> <direction> [0|1]",
    )
}

fn main() -> io::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let gpio: u32 = args
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(usage)?;
    let direction = args.next().ok_or_else(usage)?;
    let level = match args.next().as_deref() {
        None => None,
        Some("0") => Some(false),
        Some("1") => Some(true),
        Some(_) => return Err(usage()),
    };

    let config = match std::env::var("GPIOPORT_CONFIG") {
        Ok(path) => ServiceConfig::load_from_file(&path)?,
        Err(_) => ServiceConfig::default(),
    };
    info!(
        "Using sysfs root {}",
        config.controller.sysfs_root.display()
    );

    let registration = Registration::global(&config);
    let service = GpioService::new(
        &config,
        Arc::new(SysfsFilesystem::new()),
        PortWrapper,
        registration,
    )?;

    let mut port = service.open_gpio_port(Credentials::current(), gpio, &direction)?;
    info!("Opened gpio {} for {}", port.gpio(), port.consumer());

    println!("{}", u8::from(port.read_level()?));
    if let Some(high) = level {
        port.write_level(high)?;
        info!("Set gpio {gpio} to {}", u8::from(high));
    }

    Ok(())
}
