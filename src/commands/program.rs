//! Program command implementation

use crate::output::{Output, OutputMode, ProgramRecord};
use fabric_host::{Fabric, ProgramProgress, Transport, BLOCK_SIZE};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;

/// Progress reporter using an indicatif progress bar
struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl ProgramProgress for IndicatifProgress {
    fn started(&mut self, total_bytes: usize, blocks: usize) {
        log::debug!("Sending {} blocks", blocks);
        let pb = ProgressBar::new(total_bytes as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some(pb);
    }

    fn block_sent(&mut self, bytes_sent: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(bytes_sent as u64);
        }
    }

    fn completed(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message("done");
        }
    }
}

/// Progress records for scripts, one per block
struct JsonProgress {
    out: Output,
    blocks: usize,
    sent: usize,
}

impl ProgramProgress for JsonProgress {
    fn started(&mut self, _total_bytes: usize, blocks: usize) {
        self.blocks = blocks;
    }

    fn block_sent(&mut self, _bytes_sent: usize) {
        self.sent += 1;
        self.out
            .progress(format_args!("Chunk {} / {}", self.sent, self.blocks));
    }

    fn completed(&mut self) {
        self.out
            .progress(format_args!("Completed {} / {}", self.blocks, self.blocks));
    }
}

/// Reporter matching the output mode; quiet runs report nothing
enum Progress {
    Bar(IndicatifProgress),
    Json(JsonProgress),
    Silent,
}

impl Progress {
    fn for_output(out: &Output) -> Self {
        match out.mode() {
            OutputMode::Normal => Self::Bar(IndicatifProgress { bar: None }),
            OutputMode::Json => Self::Json(JsonProgress {
                out: *out,
                blocks: 0,
                sent: 0,
            }),
            OutputMode::Quiet => Self::Silent,
        }
    }

    fn abandon(&mut self) {
        if let Self::Bar(progress) = self {
            if let Some(pb) = progress.bar.take() {
                pb.abandon();
            }
        }
    }
}

impl ProgramProgress for Progress {
    fn started(&mut self, total_bytes: usize, blocks: usize) {
        match self {
            Self::Bar(p) => p.started(total_bytes, blocks),
            Self::Json(p) => p.started(total_bytes, blocks),
            Self::Silent => {}
        }
    }

    fn block_sent(&mut self, bytes_sent: usize) {
        match self {
            Self::Bar(p) => p.block_sent(bytes_sent),
            Self::Json(p) => p.block_sent(bytes_sent),
            Self::Silent => {}
        }
    }

    fn completed(&mut self) {
        match self {
            Self::Bar(p) => p.completed(),
            Self::Json(p) => p.completed(),
            Self::Silent => {}
        }
    }
}

/// Load `input` into the FPGA, optionally saving it in programmer flash
pub fn run_program<T: Transport>(
    fabric: &mut Fabric<T>,
    out: &Output,
    input: &Path,
    save: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bitstream = std::fs::read(input)?;
    if bitstream.is_empty() {
        return Err(format!("{:?} is empty", input).into());
    }

    let info = fabric.query_device()?;
    out.status(format_args!("FPGA: {}", info.fpga_id));
    if !info.ready {
        return Err(format!("FPGA {} is not supported", info.fpga_id).into());
    }

    let start = Instant::now();
    let mut progress = Progress::for_output(out);
    let result = fabric.program(&bitstream, save, &mut progress);
    progress.abandon();
    result?;
    let seconds = start.elapsed().as_secs_f64();

    out.status(format_args!(
        "Programmed {} bytes in {:.1}s",
        bitstream.len(),
        seconds
    ));
    let saved = save
        && match fabric.query_flash()? {
            Some(stored) if stored.bitstream_size as usize == bitstream.len() => {
                out.status("Bitstream saved to programmer flash");
                true
            }
            _ => {
                log::warn!("Bitstream was loaded but could not be saved to flash");
                false
            }
        };
    out.data(&ProgramRecord {
        bytes: bitstream.len(),
        blocks: bitstream.len().div_ceil(BLOCK_SIZE),
        saved,
        seconds,
    });
    Ok(())
}
