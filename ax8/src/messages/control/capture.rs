use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Offset between the Celsius and Kelvin scales.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Snapshot written when only a csv export was asked for.
pub const DEFAULT_SNAPSHOT: &str = "snap.jpg";

/// The camera takes its range bounds in Kelvin.
pub fn celsius_to_kelvin(temp: f64) -> f64 {
    temp + KELVIN_OFFSET
}

/// Image fusion mode of the camera.
#[derive(
    EnumString, IntoStaticStr, Display, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Plain visual camera image.
    #[strum(to_string = "visual")]
    Visual,
    /// Plain infrared image.
    #[strum(to_string = "ir")]
    Ir,
    /// Blended visual and infrared rendering. `msc` is accepted for
    /// scripts written against the old spelling of the option.
    #[strum(to_string = "msx", serialize = "msc")]
    Msx,
}

/// What to do with the image mode during a run. An unknown type is kept
/// around so the run can report it at the point where the mode would have
/// been set, and then carry on.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ModeSelection {
    /// Leave the camera in whatever mode it is in.
    #[default]
    Unchanged,
    Set(ImageMode),
    /// The user asked for a type the camera does not have.
    Invalid(String),
}

impl ModeSelection {
    /// Interpret the raw `--type` argument.
    ///
    /// * `raw`: user input, `None` when the option was not given.
    pub fn from_arg(raw: Option<&str>) -> Self {
        match raw {
            None => ModeSelection::Unchanged,
            Some(raw) => match ImageMode::from_str(raw.trim()) {
                Ok(mode) => ModeSelection::Set(mode),
                Err(_) => ModeSelection::Invalid(raw.to_string()),
            },
        }
    }
}

/// Torch light state.
#[derive(
    EnumString, IntoStaticStr, Display, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LightSetting {
    On,
    Off,
}

impl LightSetting {
    pub fn is_on(self) -> bool {
        self == LightSetting::On
    }
}

/// Colour palettes shipped with the camera firmware.
#[derive(
    EnumString, IntoStaticStr, Display, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Palette {
    Iron,
    Bw,
    Rainbow,
}

impl Palette {
    /// Name of the palette file on the camera.
    pub fn file_name(self) -> String {
        let name: &'static str = self.into();
        format!("{name}.pal")
    }
}

/// Manual colour mapping bounds in degrees Celsius. `min <= max` is left
/// for the camera to check.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq)]
pub struct TemperatureRange {
    pub min_c: f64,
    pub max_c: f64,
}

impl TemperatureRange {
    pub fn new(min_c: f64, max_c: f64) -> Self {
        Self { min_c, max_c }
    }

    pub fn low_kelvin(&self) -> f64 {
        celsius_to_kelvin(self.min_c)
    }

    pub fn high_kelvin(&self) -> f64 {
        celsius_to_kelvin(self.max_c)
    }
}

/// Exactly one of these is applied per run.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RangeSetting {
    /// Let the camera scale the colour mapping to the scene.
    #[default]
    Auto,
    Manual(TemperatureRange),
}

impl RangeSetting {
    /// Explicit bounds win, anything else falls back to auto scaling.
    ///
    /// * `bounds`: `[min, max]` in Celsius as given on the command line.
    pub fn from_bounds(bounds: Option<&[f64]>) -> Self {
        match bounds {
            Some([min, max]) => RangeSetting::Manual(TemperatureRange::new(*min, *max)),
            _ => RangeSetting::Auto,
        }
    }
}

/// Everything one invocation asks of the camera. Built from user input,
/// handed to the acquisition controller and dropped afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    pub mode: ModeSelection,
    /// Draw the measurement overlay into the image.
    pub show_overlay: bool,
    /// `None` leaves the torch alone.
    pub light: Option<LightSetting>,
    pub range: RangeSetting,
    pub palette: Option<Palette>,
    /// Where to write the snapshot.
    pub snapshot: Option<PathBuf>,
    /// Export the thermal data of the snapshot to this csv file.
    pub csv: Option<PathBuf>,
    /// Render a preview of the thermal data after the csv export.
    pub plot: bool,
    /// Keep capturing with this pause between captures.
    pub interval: Option<Duration>,
    /// Stop the interval loop after this many captures.
    pub count: Option<u64>,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            mode: ModeSelection::Unchanged,
            show_overlay: true,
            light: None,
            range: RangeSetting::Auto,
            palette: None,
            snapshot: None,
            csv: None,
            plot: false,
            interval: None,
            count: None,
        }
    }
}

impl CaptureRequest {
    /// The file a snapshot has to be written to, if the run needs one at
    /// all. A csv export without a snapshot name captures `snap.jpg`
    /// first.
    pub fn snapshot_target(&self) -> Option<PathBuf> {
        match (&self.snapshot, &self.csv) {
            (Some(snapshot), _) => Some(snapshot.clone()),
            (None, Some(_)) => Some(PathBuf::from(DEFAULT_SNAPSHOT)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 273.15)]
    #[case(-273.15, 0.0)]
    #[case(100.0, 373.15)]
    fn test_celsius_to_kelvin_is_exact(#[case] celsius: f64, #[case] kelvin: f64) {
        assert_eq!(celsius_to_kelvin(celsius), kelvin);
    }

    #[rstest]
    #[case("visual", ImageMode::Visual)]
    #[case("ir", ImageMode::Ir)]
    #[case("IR", ImageMode::Ir)]
    #[case("msx", ImageMode::Msx)]
    #[case("msc", ImageMode::Msx)]
    fn test_parse_image_mode(#[case] raw: &str, #[case] expected: ImageMode) {
        assert_eq!(
            ModeSelection::from_arg(Some(raw)),
            ModeSelection::Set(expected)
        );
    }

    #[test]
    fn test_image_mode_display_uses_canonical_name() {
        assert_eq!(ImageMode::Msx.to_string(), "msx");
        assert_eq!(ImageMode::Visual.to_string(), "visual");
    }

    #[rstest]
    #[case(None, ModeSelection::Unchanged)]
    #[case(Some("thermal"), ModeSelection::Invalid(String::from("thermal")))]
    fn test_mode_selection_without_valid_type(
        #[case] raw: Option<&str>,
        #[case] expected: ModeSelection,
    ) {
        assert_eq!(ModeSelection::from_arg(raw), expected);
    }

    #[rstest]
    #[case("on", LightSetting::On)]
    #[case("off", LightSetting::Off)]
    #[case("ON", LightSetting::On)]
    fn test_parse_light_setting(#[case] raw: &str, #[case] expected: LightSetting) {
        assert_eq!(LightSetting::from_str(raw).expect("Failed to parse"), expected);
    }

    #[rstest]
    #[case(Palette::Iron, "iron.pal")]
    #[case(Palette::Bw, "bw.pal")]
    #[case(Palette::Rainbow, "rainbow.pal")]
    fn test_palette_file_names(#[case] palette: Palette, #[case] expected: &str) {
        assert_eq!(palette.file_name(), expected);
    }

    #[test]
    fn test_range_defaults_to_auto() {
        assert_eq!(RangeSetting::from_bounds(None), RangeSetting::Auto);
        assert_eq!(RangeSetting::default(), RangeSetting::Auto);
        assert_eq!(
            RangeSetting::from_bounds(Some(&[20.0, 45.0])),
            RangeSetting::Manual(TemperatureRange::new(20.0, 45.0))
        );
    }

    #[test]
    fn test_inverted_range_is_passed_through() {
        let range = TemperatureRange::new(45.0, 20.0);
        assert_eq!(range.low_kelvin(), celsius_to_kelvin(45.0));
        assert_eq!(range.high_kelvin(), celsius_to_kelvin(20.0));
    }

    #[rstest]
    #[case(Some("shot.jpg"), None, Some("shot.jpg"))]
    #[case(Some("shot.jpg"), Some("data.csv"), Some("shot.jpg"))]
    #[case(None, Some("data.csv"), Some(DEFAULT_SNAPSHOT))]
    #[case(None, None, None)]
    fn test_snapshot_target(
        #[case] snapshot: Option<&str>,
        #[case] csv: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let request = CaptureRequest {
            snapshot: snapshot.map(PathBuf::from),
            csv: csv.map(PathBuf::from),
            ..Default::default()
        };
        assert_eq!(request.snapshot_target(), expected.map(PathBuf::from));
    }
}
