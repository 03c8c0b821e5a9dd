//! mmap-capture binary: grab a few frames from a V4L2 device.

use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use mmap_capture::traits::Result;
use mmap_capture::{yuyv_to_rgb24, Camera, CameraError, Config, FourCC, LogSink, MenuEntry};

/// Wait time per poll before giving up on a frame.
const POLL_TIMEOUT_MS: i32 = 2000;

#[derive(Debug, Parser)]
#[command(version, about = "Capture frames from a V4L2 device")]
struct Args {
    /// Device node to open
    #[arg(short, long, default_value = "/dev/video0")]
    device: PathBuf,

    /// Frame width; 0 keeps the current width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height; 0 keeps the current height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Pixel format tag, e.g. YUYV or MJPG
    #[arg(short, long, default_value = "YUYV")]
    format: String,

    /// Frames per second; 0 leaves the frame rate alone
    #[arg(long, default_value_t = 0)]
    fps: u32,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 10)]
    frames: u32,

    /// List device controls before capturing
    #[arg(long)]
    controls: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut camera = Camera::open_with_sink(&args.device, LogSink)?;
    camera.initialize()?;

    if let Some(caps) = camera.capabilities() {
        println!("Device: {}", caps.card);
        println!("Driver: {}", caps.driver);
    }

    if args.controls {
        print_controls(&mut camera);
    }

    let format = FourCC::from_tag(&args.format);
    let mut config = Config::new(args.width, args.height).with_format(format);
    if args.fps != 0 {
        config = config.with_interval(1, args.fps);
    }
    camera.configure(&config)?;

    if let Some(format) = camera.format() {
        println!(
            "Format: {}x{} {} ({} bytes per frame)",
            format.width, format.height, format.fourcc, format.size_image
        );
    }
    if let Some(interval) = camera.frame_interval() {
        println!(
            "Interval: {}/{} s",
            interval.numerator, interval.denominator
        );
    }

    camera.start()?;

    let mut captured = 0;
    while captured < args.frames {
        if !wait_readable(camera.as_raw_fd(), POLL_TIMEOUT_MS)? {
            warn!("timed out waiting for frame {captured}");
            break;
        }
        let frame = match camera.capture() {
            Ok(frame) => frame,
            Err(CameraError::NotReady) => continue,
            Err(err) => return Err(err),
        };
        println!(
            "Frame {}: {} bytes, timestamp: {:?}",
            frame.sequence(),
            frame.len(),
            frame.timestamp()
        );
        captured += 1;
    }

    let yuyv = camera
        .format()
        .is_some_and(|format| format.fourcc == FourCC::YUYV);
    if yuyv && !camera.snapshot().is_empty() {
        let rgb = yuyv_to_rgb24(camera.snapshot().data(), camera.width(), camera.height());
        info!("converted last frame to {} bytes of RGB24", rgb.len());
    }

    camera.stop()?;
    camera.close()
}

fn print_controls(camera: &mut Camera) {
    for control in camera.controls() {
        println!(
            "{:#010x} {:<32} {:?} [{}..={} step {}] default {}",
            control.id,
            control.name,
            control.kind,
            control.min,
            control.max,
            control.step,
            control.default
        );
        for (index, entry) in control.menus.iter().enumerate() {
            match entry {
                MenuEntry::Label(label) if label.is_empty() => {}
                MenuEntry::Label(label) => println!("    {index}: {label}"),
                MenuEntry::Value(value) => println!("    {index}: {value}"),
            }
        }
    }
}

/// Block until `fd` is readable or `timeout_ms` passes. Returns `false` on
/// timeout.
#[allow(unsafe_code)]
fn wait_readable(fd: RawFd, timeout_ms: i32) -> Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        // SAFETY: `pollfd` is a valid single-element array for the call.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready >= 0 {
            return Ok(ready > 0);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(CameraError::Io(err));
        }
    }
}
