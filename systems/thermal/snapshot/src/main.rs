//! Snapshot binary for the FLIR AX8.
use ax8::{components::prelude::*, logging};
use clap::Parser;
use color_eyre::eyre::WrapErr;
use std::{path::PathBuf, time::Duration};
use tracing::debug;

/// Functionality to control and read data from the FLIR AX8 camera.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Url of the camera, `http://` is added when missing.
    #[arg(short, long)]
    url: String,
    /// Type of image (visual/ir/msx).
    #[arg(short = 't', long = "type")]
    image_type: Option<String>,
    /// Hide the overlay.
    #[arg(long)]
    nooverlay: bool,
    /// Switch the torchlight (on/off).
    #[arg(short, long)]
    light: Option<LightSetting>,
    /// Manual temperature range in degrees Celsius.
    #[arg(
        short,
        long,
        num_args = 2,
        value_names = ["MIN", "MAX"],
        allow_negative_numbers = true,
        conflicts_with = "auto_range"
    )]
    range: Option<Vec<f64>>,
    /// Let the camera scale the temperature range, the default.
    #[arg(short, long)]
    auto_range: bool,
    /// Take a snapshot with the given filename.
    #[arg(short, long)]
    snap: Option<PathBuf>,
    /// Take a snapshot and export its thermal data to a csv file.
    #[arg(short, long)]
    csv: Option<PathBuf>,
    /// Render a preview of the thermal data next to the snapshot.
    #[arg(short, long)]
    plot: bool,
    /// Keep capturing, pausing this many seconds between captures.
    #[arg(short, long, value_parser = parse_interval)]
    interval: Option<Duration>,
    /// Stop after this many interval captures.
    #[arg(short = 'n', long, requires = "interval")]
    count: Option<u64>,
    /// Colour palette (iron/bw/rainbow).
    #[arg(long)]
    palette: Option<Palette>,
    /// Path to a yaml config file for the camera.
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,
    /// Print camera replies and per request detail.
    #[arg(short, long)]
    debug: bool,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let seconds: f64 = raw.parse().map_err(|_| format!("{raw:?} is not a number"))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| format!("{raw:?} is not a valid interval"))
}

impl Args {
    fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            mode: ModeSelection::from_arg(self.image_type.as_deref()),
            show_overlay: !self.nooverlay,
            light: self.light,
            range: RangeSetting::from_bounds(self.range.as_deref()),
            palette: self.palette,
            snapshot: self.snap.clone(),
            csv: self.csv.clone(),
            plot: self.plot,
            interval: self.interval,
            count: self.count,
        }
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    logging::init(args.debug)?;

    let config = match &args.config {
        Some(path) => Ax8Config::from_file(path)
            .wrap_err_with(|| format!("Loading config {}", path.display()))?,
        None => Ax8Config::default(),
    };
    debug!(?config, "loaded configuration");

    let session = CameraSession::new(&args.url, args.debug)?;
    let client = ResourceClient::with_timeout(session, config.request_timeout())?;
    let mut controller = AcquisitionController::from_config(client, &config);
    controller
        .run(&args.capture_request())
        .wrap_err_with(|| format!("Talking to camera at {}", args.url))?;
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use rstest::rstest;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["ax8-snapshot", "--url", "192.168.1.10"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let request = parse(&[]).expect("Failed to parse").capture_request();
        assert_eq!(request, CaptureRequest::default());
    }

    #[test]
    fn test_url_is_required() {
        assert!(Args::try_parse_from(["ax8-snapshot"]).is_err());
    }

    #[test]
    fn test_full_request() {
        let request = parse(&[
            "--type", "ir", "--nooverlay", "--light", "on", "--range", "-10", "40", "--csv",
            "data.csv", "--plot", "--interval", "2.5", "--count", "3",
        ])
        .expect("Failed to parse")
        .capture_request();

        assert_eq!(request.mode, ModeSelection::Set(ImageMode::Ir));
        assert!(!request.show_overlay);
        assert_eq!(request.light, Some(LightSetting::On));
        assert_eq!(
            request.range,
            RangeSetting::Manual(TemperatureRange::new(-10.0, 40.0))
        );
        assert_eq!(request.snapshot_target(), Some(PathBuf::from(DEFAULT_SNAPSHOT)));
        assert!(request.plot);
        assert_eq!(request.interval, Some(Duration::from_millis(2500)));
        assert_eq!(request.count, Some(3));
    }

    #[test]
    fn test_unknown_type_is_not_a_parse_error() {
        let request = parse(&["--type", "thermal"])
            .expect("Failed to parse")
            .capture_request();
        assert_eq!(request.mode, ModeSelection::Invalid(String::from("thermal")));
    }

    #[rstest]
    #[case(&["--range", "10", "20", "--auto-range"])]
    #[case(&["--light", "dim"])]
    #[case(&["--interval", "-1"])]
    #[case(&["--range", "10"])]
    #[case(&["--count", "2"])]
    fn test_rejected_arguments(#[case] extra: &[&str]) {
        assert!(parse(extra).is_err());
    }
}
