// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP utility.
 *
 * Copyright (c) 2025 Code Construct
 */
#[allow(unused)]
use log::{debug, error, info, trace, warn};

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use mtp::{config, DeviceDescriptor, MtpClient, ObjectHandle, StorageId};
use mtp_usb::{DeviceEvent, DeviceMonitor, UsbTransport};

#[derive(FromArgs, Debug)]
#[argh(description = "MTP device utility")]
struct Args {
    #[argh(switch, short = 'd')]
    /// debug logging
    debug: bool,

    #[argh(switch)]
    /// trace logging
    trace: bool,

    /// USB transfer timeout in milliseconds
    #[argh(option)]
    timeout: Option<u64>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    List(ListCommand),
    Watch(WatchCommand),
    Slots(SlotsCommand),
    Storages(StoragesCommand),
    Ls(LsCommand),
    Get(GetCommand),
    Put(PutCommand),
    Rm(RmCommand),
    Count(CountCommand),
    Version(VersionCommand),
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "version", description = "Print version")]
struct VersionCommand {}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "list", description = "List USB devices")]
struct ListCommand {}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "watch",
    description = "Report USB devices as they connect and disconnect"
)]
struct WatchCommand {
    /// poll interval in milliseconds
    #[argh(option)]
    interval: Option<u64>,
}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "slots",
    description = "Print Electric Pass storage slots"
)]
struct SlotsCommand {}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "storages", description = "List storage IDs")]
struct StoragesCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "ls", description = "List objects in a storage")]
struct LsCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,

    /// storage ID or slot name
    #[argh(positional)]
    storage: Storage,

    /// parent object handle. Default is the storage root
    #[argh(option)]
    parent: Option<Number>,

    /// object format filter. Default is all formats
    #[argh(option)]
    format: Option<Number>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "get", description = "Download an object")]
struct GetCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,

    /// object handle
    #[argh(positional)]
    handle: Number,

    /// output file
    #[argh(positional)]
    output: String,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "put", description = "Upload a file")]
struct PutCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,

    /// storage ID or slot name
    #[argh(positional)]
    storage: Storage,

    /// file to send
    #[argh(positional)]
    file: String,

    /// filename on the device. Default is the local file name
    #[argh(option)]
    name: Option<String>,

    /// parent object handle. Default is the storage root
    #[argh(option)]
    parent: Option<Number>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "rm", description = "Delete an object")]
struct RmCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,

    /// object handle
    #[argh(positional)]
    handle: Number,
}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "count",
    description = "Count objects in a storage"
)]
struct CountCommand {
    /// USB vendor:product of device, hex
    #[argh(positional)]
    device: DeviceDescriptor,

    /// storage ID or slot name
    #[argh(positional)]
    storage: Storage,
}

/// Parses decimal or 0x-prefixed hex
fn parse_u32(s: &str) -> Result<u32, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("bad number '{s}': {e}"))
}

/// A storage ID argument: a number, or an Electric Pass slot name
#[derive(Debug, Clone, Copy)]
struct Storage(StorageId);

impl FromStr for Storage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        if let Some(id) = mtp::slot_storage_id(s) {
            return Ok(Self(id));
        }
        if s.starts_with("slot_") {
            return Err(format!("unknown slot '{s}', expected slot_1..slot_6"));
        }
        parse_u32(s).map(|v| Self(StorageId(v)))
    }
}

/// A handle or format argument, decimal or 0x hex
#[derive(Debug, Clone, Copy)]
struct Number(u32);

impl FromStr for Number {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        parse_u32(s).map(Self)
    }
}

/// Connects and opens a session, runs `f`, then tears down.
///
/// Teardown failures are logged, the result of `f` is returned.
fn with_session<R>(
    dev: &DeviceDescriptor,
    timeout: Duration,
    f: impl FnOnce(&mut MtpClient<UsbTransport>) -> mtp::Result<R>,
) -> Result<R> {
    let mut client = MtpClient::new(UsbTransport::with_timeout(timeout));
    client
        .connect(dev)
        .with_context(|| format!("Can't connect to {dev}"))?;
    if let Some(d) = client.transport().device() {
        debug!("Connected to {d}");
    }

    let r = client
        .open_session()
        .context("Can't open MTP session")
        .and_then(|()| f(&mut client).map_err(anyhow::Error::from));

    if let Err(e) = client.close_session() {
        warn!("Closing session failed: {e}");
    }
    client.disconnect();
    r
}

fn slot_name(id: StorageId) -> Option<&'static str> {
    mtp::ELECTRIC_PASS_STORAGE_IDS
        .iter()
        .find(|(_, s)| *s == id)
        .map(|(n, _)| *n)
}

fn print_device(d: &DeviceDescriptor) {
    println!(
        "{:<20} {} {}",
        d.device_id(),
        d.manufacturer.as_deref().unwrap_or("-"),
        d.product.as_deref().unwrap_or("-"),
    );
}

fn watch(interval: Duration) -> Result<()> {
    let mut monitor = DeviceMonitor::new();
    info!("Watching USB devices, interval {}ms", interval.as_millis());
    loop {
        for ev in monitor.poll().context("USB scan failed")? {
            match ev {
                DeviceEvent::Connected(d) => {
                    print!("+ ");
                    print_device(&d);
                }
                DeviceEvent::Disconnected(id) => println!("- {id}"),
            }
        }
        std::thread::sleep(interval);
    }
}

fn put(c: PutCommand, timeout: Duration) -> Result<()> {
    let data = std::fs::read(&c.file)
        .with_context(|| format!("Can't read {}", c.file))?;
    let name = match c.name {
        Some(n) => n,
        None => match Path::new(&c.file).file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => bail!("No file name in '{}', use --name", c.file),
        },
    };
    let parent = c.parent.map_or(ObjectHandle::ROOT, |h| ObjectHandle(h.0));

    let handle = with_session(&c.device, timeout, |client| {
        client.send_object(c.storage.0, &name, &data, parent)
    })
    .with_context(|| format!("Can't send {name}"))?;
    println!("Sent {name}, {} bytes, handle {handle}", data.len());
    Ok(())
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let level = if args.trace {
        log::LevelFilter::Trace
    } else if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let timeout = args
        .timeout
        .map_or(config::DEFAULT_TIMEOUT, Duration::from_millis);

    match args.command {
        Command::Version(_) => println!("mtp-util {}", env!("VERSION")),
        Command::List(_) => {
            for d in mtp_usb::list_devices().context("USB scan failed")? {
                print_device(&d);
            }
        }
        Command::Watch(w) => {
            let interval = w
                .interval
                .map_or(config::USB_POLL_INTERVAL, Duration::from_millis);
            watch(interval)?;
        }
        Command::Slots(_) => {
            for (name, id) in mtp::electric_pass_storage_ids() {
                println!("{name}  0x{id:08x}");
            }
        }
        Command::Storages(s) => {
            let ids =
                with_session(&s.device, timeout, |c| c.get_storage_ids())?;
            for id in ids {
                match slot_name(id) {
                    Some(n) => println!("{id}  {n}"),
                    None => println!("{id}"),
                }
            }
        }
        Command::Ls(l) => {
            let format = l.format.map_or(0, |f| f.0);
            let parent = l
                .parent
                .map_or(ObjectHandle::ROOT_PARENT, |h| ObjectHandle(h.0));
            let handles = with_session(&l.device, timeout, |c| {
                c.get_object_handles(l.storage.0, format, parent)
            })?;
            for h in handles {
                println!("{h}");
            }
        }
        Command::Get(g) => {
            let data = with_session(&g.device, timeout, |c| {
                c.get_object(ObjectHandle(g.handle.0))
            })?;
            std::fs::write(&g.output, &data)
                .with_context(|| format!("Can't write {}", g.output))?;
            println!("Wrote {} bytes to {}", data.len(), g.output);
        }
        Command::Put(p) => put(p, timeout)?,
        Command::Rm(r) => {
            let handle = ObjectHandle(r.handle.0);
            with_session(&r.device, timeout, |c| c.delete_object(handle))?;
            println!("Deleted {handle}");
        }
        Command::Count(c) => {
            let n = with_session(&c.device, timeout, |client| {
                let root = ObjectHandle::ROOT_PARENT;
                client.get_num_objects(c.storage.0, 0, root)
            })?;
            println!("{n}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_arg() {
        let s: Storage = "slot_1".parse().unwrap();
        assert_eq!(s.0, StorageId(0xFFFF0001));
        let s: Storage = "slot_6".parse().unwrap();
        assert_eq!(s.0, StorageId(0xFFFF0006));
        let s: Storage = "0x10001".parse().unwrap();
        assert_eq!(s.0, StorageId(0x10001));
        let s: Storage = "65537".parse().unwrap();
        assert_eq!(s.0, StorageId(0x10001));

        assert!("slot_7".parse::<Storage>().is_err());
        assert!("slot".parse::<Storage>().is_err());
        assert!("0xZZ".parse::<Storage>().is_err());
        assert!("".parse::<Storage>().is_err());
    }

    #[test]
    fn number_arg() {
        assert_eq!("0xffffffff".parse::<Number>().unwrap().0, 0xFFFFFFFF);
        assert_eq!("0X2A".parse::<Number>().unwrap().0, 42);
        assert_eq!("42".parse::<Number>().unwrap().0, 42);
        assert!("4294967296".parse::<Number>().is_err());
        assert!("-1".parse::<Number>().is_err());
    }

    #[test]
    fn slot_names() {
        assert_eq!(slot_name(StorageId(0xFFFF0002)), Some("slot_2"));
        assert_eq!(slot_name(StorageId(0x00010001)), None);
    }
}
