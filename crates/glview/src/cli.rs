use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use viewconfig::RenderModeSetting;

pub const MAX_PAUSE_CYCLES: i64 = 1000;

#[derive(Parser, Debug)]
#[command(
    name = "glview",
    author,
    version,
    about = "Run a headless render view through its lifecycle"
)]
pub struct Cli {
    /// View configuration TOML file.
    #[arg(long, value_name = "FILE", env = "GLVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Drawable width in pixels (overrides `[demo] width`).
    #[arg(long, value_name = "PIXELS")]
    pub width: Option<u32>,

    /// Drawable height in pixels (overrides `[demo] height`).
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    /// Render mode: `when-dirty` or `continuously`.
    #[arg(long, value_name = "MODE", value_parser = parse_render_mode)]
    pub mode: Option<RenderModeSetting>,

    /// Total time spent rendering, e.g. `500ms` or `2s`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Keep the context alive while paused.
    #[arg(long)]
    pub preserve_context: bool,

    /// Simulate a lost context once during the run.
    #[arg(long)]
    pub lose_context: bool,

    /// Number of pause/resume cycles spread over the run (at most 1000).
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(0..=MAX_PAUSE_CYCLES)
    )]
    pub pause_cycles: u32,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_render_mode(value: &str) -> Result<RenderModeSetting, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("render mode must not be empty".to_string());
    }
    trimmed.to_ascii_lowercase().parse()
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value.trim())
        .map_err(|err| format!("invalid duration '{value}': {err}"))?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_render_modes() {
        assert_eq!(
            parse_render_mode("when-dirty").unwrap(),
            RenderModeSetting::WhenDirty
        );
        assert_eq!(
            parse_render_mode(" Continuously ").unwrap(),
            RenderModeSetting::Continuously
        );
        assert!(parse_render_mode("").is_err());
        assert!(parse_render_mode("sideways").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn flags_map_onto_fields() {
        let cli = Cli::try_parse_from([
            "glview",
            "--width",
            "800",
            "--mode",
            "when-dirty",
            "--lose-context",
            "--pause-cycles",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.width, Some(800));
        assert_eq!(cli.height, None);
        assert_eq!(cli.mode, Some(RenderModeSetting::WhenDirty));
        assert!(cli.lose_context);
        assert!(!cli.preserve_context);
        assert_eq!(cli.pause_cycles, 3);
    }

    #[test]
    fn pause_cycles_are_bounded() {
        assert!(Cli::try_parse_from(["glview", "--pause-cycles", "1000"]).is_ok());
        assert!(Cli::try_parse_from(["glview", "--pause-cycles", "1001"]).is_err());
        assert!(Cli::try_parse_from(["glview", "--pause-cycles", "4294967295"]).is_err());
    }
}
