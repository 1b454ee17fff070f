use std::path::PathBuf;

use blkcrypt_core::{Direction, RunOptions, DEFAULT_CHUNK_SIZE};
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "blkcrypt")]
#[command(about = "Resumable in-place block device encryption", version)]
pub struct Cli {
    /// Transformation mode
    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: ModeArg,

    /// Existing writable directory holding the run's durable state
    #[arg(short = 'w', long = "workdir")]
    pub workdir: PathBuf,

    /// Perform all workdir side effects but suppress device writes
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Chunk size in bytes; must be a positive multiple of 16
    #[arg(short = 's', long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Device or file to transform in place
    pub device: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Encrypt the device
    Enc,
    /// Decrypt the device
    Dec,
}

impl From<ModeArg> for Direction {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Enc => Direction::Encrypt,
            ModeArg::Dec => Direction::Decrypt,
        }
    }
}

impl Cli {
    pub fn into_options(self) -> RunOptions {
        RunOptions {
            device: self.device,
            workdir: self.workdir,
            direction: self.mode.into(),
            chunk_size: self.chunk_size,
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_required_flags() {
        let cli = Cli::parse_from(["blkcrypt", "-m", "enc", "-w", "/tmp/wd", "/dev/sdz"]);
        assert_eq!(cli.mode, ModeArg::Enc);
        assert_eq!(cli.workdir, PathBuf::from("/tmp/wd"));
        assert_eq!(cli.device, PathBuf::from("/dev/sdz"));
        assert_eq!(cli.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_parses_dry_run_and_chunk_size() {
        let cli = Cli::parse_from([
            "blkcrypt", "-m", "dec", "-w", "wd", "-n", "-s", "65536", "disk.img",
        ]);
        assert_eq!(cli.mode, ModeArg::Dec);
        assert!(cli.dry_run);
        assert_eq!(cli.chunk_size, 65536);
    }

    #[test]
    fn test_mode_is_required() {
        assert!(Cli::try_parse_from(["blkcrypt", "-w", "wd", "disk.img"]).is_err());
    }

    #[test]
    fn test_mode_maps_to_direction() {
        assert_eq!(Direction::from(ModeArg::Enc), Direction::Encrypt);
        assert_eq!(Direction::from(ModeArg::Dec), Direction::Decrypt);
    }
}
