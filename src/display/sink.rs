//! Where warped frames go

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::types::Result;
use crate::display::vsync::VsyncTick;
use crate::frame::EyeImage;

/// How many presented tick indices a headless sink remembers
const TICK_HISTORY: usize = 4096;

/// Receives the warped output of a CPU warp, once per vsync
pub trait FrameSink: Send {
    /// Show `frame` for the refresh starting at `tick`
    fn present(&mut self, frame: &EyeImage, tick: VsyncTick) -> Result<()>;

    /// Last frame handed to `present`, if the sink keeps it
    fn last_frame(&self) -> Option<&EyeImage>;

    /// The window behind the sink changed size
    fn resize(&mut self, _width: u32, _height: u32) {}
}

/// Frames waiting for the PNG writer before new dumps are dropped
const DUMP_QUEUE_DEPTH: usize = 4;

/// A frame on its way to disk
struct DumpJob {
    path: PathBuf,
    image: EyeImage,
}

/// Periodic PNG output of presented frames.
///
/// Encoding and writing happen on a dedicated `atw-dump` thread fed by a
/// bounded channel. The presenting thread only clones the frame into the
/// queue; when the writer falls behind the dump is dropped and counted.
pub struct PngDump {
    dir: PathBuf,
    /// Write every n-th tick
    every: u64,
    tx: Option<mpsc::Sender<DumpJob>>,
    writer: Option<JoinHandle<()>>,
    dropped: AtomicU64,
}

impl PngDump {
    pub fn new(dir: PathBuf, every: u64) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let (tx, mut rx) = mpsc::channel::<DumpJob>(DUMP_QUEUE_DEPTH);
        let writer = std::thread::Builder::new()
            .name("atw-dump".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if let Err(e) = job.image.save_png(&job.path) {
                        log::warn!("Failed to write {}: {}", job.path.display(), e);
                    }
                }
            })?;
        log::info!("Dumping every {} vsyncs to {}", every.max(1), dir.display());
        Ok(Self {
            dir,
            every: every.max(1),
            tx: Some(tx),
            writer: Some(writer),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn path_for(&self, tick: VsyncTick) -> PathBuf {
        self.dir.join(format!("vsync_{:06}.png", tick.index))
    }

    pub fn is_due(&self, tick: VsyncTick) -> bool {
        tick.index % self.every == 0
    }

    /// Dumps skipped because the writer was still busy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a copy of `frame` if `tick` is due
    pub fn maybe_write(&self, frame: &EyeImage, tick: VsyncTick) {
        if self.is_due(tick) {
            self.submit(frame.clone(), tick);
        }
    }

    /// Queue `image` for writing without waiting for the writer
    pub fn submit(&self, image: EyeImage, tick: VsyncTick) {
        let Some(tx) = &self.tx else { return };
        let job = DumpJob {
            path: self.path_for(tick),
            image,
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("PNG writer busy, skipping {}", job.path.display());
            }
            Err(TrySendError::Closed(job)) => {
                log::warn!("PNG writer gone, skipping {}", job.path.display());
            }
        }
    }
}

impl Drop for PngDump {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish the queue and exit
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                log::warn!("PNG writer thread panicked");
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            log::info!("{} PNG dumps skipped while the writer was busy", dropped);
        }
    }
}

/// Display without a window: remembers what would have been scanned out
#[derive(Default)]
pub struct HeadlessSink {
    last: Option<EyeImage>,
    ticks: VecDeque<u64>,
    presented: u64,
    dump: Option<PngDump>,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dump(dump: PngDump) -> Self {
        Self {
            dump: Some(dump),
            ..Self::default()
        }
    }

    /// Number of frames presented
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Indices of the most recent presented ticks, oldest first
    pub fn presented_ticks(&self) -> impl Iterator<Item = u64> + '_ {
        self.ticks.iter().copied()
    }
}

impl FrameSink for HeadlessSink {
    fn present(&mut self, frame: &EyeImage, tick: VsyncTick) -> Result<()> {
        self.presented += 1;
        self.ticks.push_back(tick.index);
        if self.ticks.len() > TICK_HISTORY {
            self.ticks.pop_front();
        }

        if let Some(dump) = &self.dump {
            dump.maybe_write(frame, tick);
        }

        // Reuse the allocation while the display size stays the same
        match self.last.as_mut() {
            Some(last) if last.width() == frame.width() && last.height() == frame.height() => {
                last.pixels_mut().copy_from_slice(frame.pixels());
            }
            _ => self.last = Some(frame.clone()),
        }
        Ok(())
    }

    fn last_frame(&self) -> Option<&EyeImage> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_headless_keeps_last_frame() {
        let mut sink = HeadlessSink::new();
        for i in 0..3u64 {
            let frame = EyeImage::filled(4, 2, [i as u8, 0, 0, 255]);
            sink.present(&frame, VsyncTick { index: i, time: Duration::ZERO }).unwrap();
        }
        assert_eq!(sink.presented(), 3);
        assert_eq!(sink.last_frame().unwrap().get(0, 0), [2, 0, 0, 255]);
        assert_eq!(sink.presented_ticks().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_png_dump_every_n() {
        let dir = tempfile::tempdir().unwrap();
        let dump = PngDump::new(dir.path().join("frames"), 2).unwrap();
        let mut sink = HeadlessSink::with_dump(dump);
        let frame = EyeImage::filled(4, 4, [10, 20, 30, 255]);
        for i in 0..5u64 {
            sink.present(&frame, VsyncTick { index: i, time: Duration::ZERO }).unwrap();
        }
        // Dropping the sink waits for the writer to drain its queue
        drop(sink);
        let mut files: Vec<_> = std::fs::read_dir(dir.path().join("frames"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["vsync_000000.png", "vsync_000002.png", "vsync_000004.png"]);
    }

    #[test]
    fn test_dump_does_not_block_present() {
        let dir = tempfile::tempdir().unwrap();
        let dump = PngDump::new(dir.path().to_path_buf(), 1).unwrap();
        let mut sink = HeadlessSink::with_dump(dump);
        // Side-by-side 640x640 eyes, the default display
        let frame = EyeImage::from_fn(1280, 640, |x, y| [x as u8, y as u8, (x ^ y) as u8, 255]);
        let period = Duration::from_secs_f64(1.0 / 60.0);

        for i in 0..12u64 {
            let began = std::time::Instant::now();
            sink.present(&frame, VsyncTick { index: i, time: Duration::ZERO }).unwrap();
            let took = began.elapsed();
            assert!(took < period / 2, "present {} took {:?}", i, took);
        }
        assert_eq!(sink.presented(), 12);

        drop(sink);
        let written = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(written >= 1 && written <= 12, "{} files", written);
    }

    #[test]
    fn test_full_queue_drops_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let dump = PngDump::new(dir.path().to_path_buf(), 1).unwrap();
        let frame = EyeImage::from_fn(1280, 640, |x, y| [x as u8, y as u8, 0, 255]);
        // Far more than the writer can encode before the loop finishes
        for i in 0..64u64 {
            dump.maybe_write(&frame, VsyncTick { index: i, time: Duration::ZERO });
        }
        let dropped = dump.dropped();
        assert!(dropped > 0);
        drop(dump);
        let written = std::fs::read_dir(dir.path()).unwrap().count() as u64;
        assert_eq!(written + dropped, 64);
    }
}
