use crate::{
    config::{Ax8Config, ScheduleConfig},
    devices::hardware::camera::{Download, ResourceApi, ResourceValue},
    error::{Error, Result},
    messages::control::capture::{
        CaptureRequest, ImageMode, ModeSelection, Palette, RangeSetting, TemperatureRange,
    },
    utils::{
        clock::{Clock, SystemClock},
        image::{FlirImageExtractor, ThermalExtractor},
    },
};
use chrono::{DateTime, Local, Timelike};
use serde::Serialize;
use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

// Resource paths are defined by the camera firmware, spelling included.
const FUSION_MODE: &str = ".image.sysimg.fusion.fusionData.fusionMode";
const USE_LEVEL_SPAN: &str = ".image.sysimg.fusion.fusionData.useLevelSpan";
const ADJUST_MODE: &str = ".image.contadj.adjMode";
const LOW_TEMPERATURE: &str = ".image.sysimg.basicImgData.extraInfo.lowT";
const HIGH_TEMPERATURE: &str = ".image.sysimg.basicImgData.extraInfo.highT";
const HIDE_GRAPHICS: &str = ".resmon.config.hideGraphics";
const TORCH: &str = ".system.vcam.torch";
const PALETTE: &str = ".image.sysimage.palette.readFile";
const STORE_FORMAT: &str = ".image.services.store.format";
const STORE_OVERLAY: &str = ".image.services.store.overlay";
const STORE_OVERWRITE: &str = ".image.services.store.owerwrite";
const STORE_FILE_NAME: &str = ".image.services.store.fileNameW";
const STORE_COMMIT: &str = ".image.services.store.commit";
const SPOT: &str = ".image.sysimg.measureFuncs.spot.1";
const MEASUREMENT_BOX: &str = ".image.sysimg.measureFuncs.mbox";
const SCHEDULE: &str = ".resmon.schedule";

/// Fusion mode values understood by the firmware.
const FUSION_SINGLE: i64 = 1;
const FUSION_MSX: i64 = 3;

/// Prefix of single shot file names on the camera.
pub const CAMERA_FILE_PREFIX: &str = "ax8";
/// The camera has six measurement boxes, numbered from one.
pub const MEASUREMENT_BOXES: u8 = 6;

/// How the download of a committed file is retried while the camera is
/// still rendering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause after every attempt that found no file.
    pub backoff: Duration,
    /// Give up once this much time has passed. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(50),
            max_wait: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&Ax8Config> for PollPolicy {
    fn from(config: &Ax8Config) -> Self {
        Self {
            backoff: config.poll_backoff(),
            max_wait: config.render_timeout(),
        }
    }
}

/// Name of a single shot on the camera: `ax8<hour>-<minute>-<second>.jpg`,
/// without zero padding.
///
/// * `at`: capture time.
pub fn camera_file_name(at: &DateTime<Local>) -> String {
    format!(
        "{CAMERA_FILE_PREFIX}{}-{}-{}.jpg",
        at.hour(),
        at.minute(),
        at.second()
    )
}

fn timestamped(path: &Path, extension: &str, at: &DateTime<Local>) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{extension}");
    let stem = name.strip_suffix(&suffix).unwrap_or(&name);
    path.with_file_name(format!(
        "{stem}_{}.{extension}",
        at.format("%Y%m%d-%H%M%S-%3f")
    ))
}

/// Where the snapshot of one interval capture goes: the base name with an
/// exact `.jpg` suffix removed, followed by the capture time.
///
/// * `base`: snapshot path given by the user.
/// * `at`: capture time.
pub fn interval_file_name(base: &Path, at: &DateTime<Local>) -> PathBuf {
    timestamped(base, "jpg", at)
}

/// Csv companion of an interval capture, see [`interval_file_name`].
///
/// * `csv`: csv path given by the user.
/// * `at`: capture time.
pub fn interval_csv_path(csv: &Path, at: &DateTime<Local>) -> PathBuf {
    timestamped(csv, "csv", at)
}

fn unquote(reply: &str) -> &str {
    let trimmed = reply.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Read a number out of a quoted reply such as `"23.5 C"`, ignoring the
/// unit.
///
/// * `resource`: the resource the reply belongs to, for the error.
/// * `reply`: raw reply body.
pub fn parse_temperature(resource: &str, reply: &str) -> Result<f64> {
    let value = unquote(reply)
        .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace() || c == '°');
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::UnexpectedResponse {
            resource: resource.to_string(),
            response: reply.to_string(),
        })
}

/// Readout of one measurement box. Values are kept as the camera formats
/// them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MeasurementBox {
    pub index: u8,
    pub active: bool,
    pub avg_t: Option<String>,
    pub min_t: Option<String>,
    pub max_t: Option<String>,
}

fn elapsed(clock: &impl Clock, started: Instant) -> Duration {
    clock.instant().saturating_duration_since(started)
}

/// Sequences resource writes into the behaviours of the camera: image mode,
/// overlay, torch, colour range, snapshots and csv export. Every write is
/// fire and forget, a failure later in a run does not undo earlier ones.
pub struct AcquisitionController<R, E = FlirImageExtractor, C = SystemClock> {
    client: R,
    extractor: E,
    clock: C,
    poll: PollPolicy,
}

impl<R: ResourceApi> AcquisitionController<R> {
    /// Controller with the default poll policy, the real clock and the
    /// FLIR extractor for csv exports.
    ///
    /// * `client`: resource access to the camera.
    pub fn new(client: R) -> Self {
        Self::with_parts(client, FlirImageExtractor::new(), SystemClock, PollPolicy::default())
    }

    /// Controller that takes its poll policy from the configuration file.
    ///
    /// * `client`: resource access to the camera.
    /// * `config`: loaded configuration.
    pub fn from_config(client: R, config: &Ax8Config) -> Self {
        Self::with_parts(client, FlirImageExtractor::new(), SystemClock, config.into())
    }
}

impl<R, E, C> AcquisitionController<R, E, C>
where
    R: ResourceApi,
    E: ThermalExtractor,
    C: Clock,
{
    /// Assemble a controller from its collaborators.
    pub fn with_parts(client: R, extractor: E, clock: C, poll: PollPolicy) -> Self {
        Self {
            client,
            extractor,
            clock,
            poll,
        }
    }

    pub fn client(&self) -> &R {
        &self.client
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    fn set(&self, resource: &str, value: impl Into<ResourceValue>) -> Result<String> {
        self.client.set_resource(resource, &value.into())
    }

    pub fn set_visual_mode(&self) -> Result<()> {
        self.set(FUSION_MODE, FUSION_SINGLE)?;
        self.set(USE_LEVEL_SPAN, 0_i64)?;
        Ok(())
    }

    pub fn set_ir_mode(&self) -> Result<()> {
        self.set(FUSION_MODE, FUSION_SINGLE)?;
        self.set(USE_LEVEL_SPAN, 1_i64)?;
        Ok(())
    }

    pub fn set_msx_mode(&self) -> Result<()> {
        self.set(FUSION_MODE, FUSION_MSX)?;
        Ok(())
    }

    pub fn set_mode(&self, mode: ImageMode) -> Result<()> {
        match mode {
            ImageMode::Visual => self.set_visual_mode(),
            ImageMode::Ir => self.set_ir_mode(),
            ImageMode::Msx => self.set_msx_mode(),
        }
    }

    /// Switch to manual colour mapping between `min_c` and `max_c`.
    ///
    /// * `min_c`: lower bound in Celsius.
    /// * `max_c`: upper bound in Celsius.
    pub fn set_temperature_range(&self, min_c: f64, max_c: f64) -> Result<()> {
        let range = TemperatureRange::new(min_c, max_c);
        self.set(ADJUST_MODE, "manual")?;
        self.set(LOW_TEMPERATURE, range.low_kelvin())?;
        self.set(HIGH_TEMPERATURE, range.high_kelvin())?;
        Ok(())
    }

    pub fn set_auto_temperature_range(&self) -> Result<()> {
        self.set(ADJUST_MODE, "auto")?;
        Ok(())
    }

    /// Apply exactly one of the two range settings.
    pub fn apply_range(&self, range: RangeSetting) -> Result<()> {
        match range {
            RangeSetting::Manual(range) => {
                self.set_temperature_range(range.min_c, range.max_c)?;
                info!(
                    "Setting temperature range {} C to {} C",
                    range.min_c, range.max_c
                );
            }
            RangeSetting::Auto => {
                self.set_auto_temperature_range()?;
                info!("Setting automatic temperature range");
            }
        }
        Ok(())
    }

    /// The camera stores the inverse, whether graphics are hidden.
    pub fn show_overlay(&self, show: bool) -> Result<()> {
        self.set(HIDE_GRAPHICS, !show)?;
        Ok(())
    }

    pub fn light(&self, on: bool) -> Result<()> {
        self.set(TORCH, on)?;
        Ok(())
    }

    pub fn set_palette(&self, palette: Palette) -> Result<()> {
        self.set(PALETTE, palette.file_name())?;
        Ok(())
    }

    /// Measure the temperature at a pixel with the first spot meter.
    ///
    /// * `x`: column in the IR image.
    /// * `y`: row in the IR image.
    pub fn temperature_at(&self, x: u32, y: u32) -> Result<f64> {
        self.set(&format!("{SPOT}.active"), true)?;
        self.set(&format!("{SPOT}.x"), x)?;
        self.set(&format!("{SPOT}.y"), y)?;
        let resource = format!("{SPOT}.valueT");
        let reply = self.client.get_resource(&resource)?;
        parse_temperature(&resource, &reply)
    }

    /// Read one measurement box. An inactive box only reports that.
    ///
    /// * `index`: box number, starting at one.
    pub fn measurement_box(&self, index: u8) -> Result<MeasurementBox> {
        let field = |name: &str| -> Result<String> {
            let reply = self
                .client
                .get_resource(&format!("{MEASUREMENT_BOX}.{index}.{name}"))?;
            Ok(unquote(&reply).to_string())
        };

        let active = field("active")? != "false";
        if !active {
            return Ok(MeasurementBox {
                index,
                active,
                avg_t: None,
                min_t: None,
                max_t: None,
            });
        }
        Ok(MeasurementBox {
            index,
            active,
            avg_t: Some(field("avgT")?),
            min_t: Some(field("minT")?),
            max_t: Some(field("maxT")?),
        })
    }

    pub fn measurement_boxes(&self) -> Result<Vec<MeasurementBox>> {
        (1..=MEASUREMENT_BOXES)
            .map(|index| self.measurement_box(index))
            .collect()
    }

    /// Program the camera to push images to an FTP server on its own.
    pub fn set_periodic_mode(&self, schedule: &ScheduleConfig) -> Result<()> {
        let day = format!("{SCHEDULE}.{}", schedule.day);
        self.set(&format!("{SCHEDULE}.active"), true)?;
        self.set(&format!("{SCHEDULE}.config.ftp"), schedule.ftp.as_str())?;
        self.set(&format!("{SCHEDULE}.config.imageFormat"), "JPEG")?;
        self.set(&format!("{SCHEDULE}.actions.sendImage"), true)?;
        self.set(&format!("{SCHEDULE}.results.1.active"), true)?;
        self.set(&format!("{day}.active"), true)?;
        self.set(&format!("{day}.mode"), "repeat")?;
        self.set(&format!("{day}.start"), schedule.start.as_str())?;
        self.set(&format!("{day}.stop"), schedule.stop.as_str())?;
        self.set(&format!("{day}.interval"), schedule.interval.as_str())?;
        self.set(&format!("{SCHEDULE}.reinit"), true)?;
        info!(
            "Scheduled images to {} on {} from {} to {} every {}",
            schedule.ftp, schedule.day, schedule.start, schedule.stop, schedule.interval
        );
        Ok(())
    }

    /// Take a single snapshot and write it to `destination`. The file on
    /// the camera is named after the current time.
    ///
    /// * `destination`: local path, overwritten without asking.
    pub fn get_snapshot(&self, destination: &Path) -> Result<()> {
        let camera_name = camera_file_name(&self.clock.now());
        self.get_snapshot_as(destination, &camera_name)
    }

    /// Render the current image to `camera_name` on the camera, wait for
    /// the file to appear and copy it to `destination`.
    ///
    /// * `destination`: local path, overwritten without asking.
    /// * `camera_name`: file name on the camera's storage.
    pub fn get_snapshot_as(&self, destination: &Path, camera_name: &str) -> Result<()> {
        let started = self.clock.instant();

        self.set(STORE_FORMAT, "JPEG")?;
        self.set(STORE_OVERLAY, true)?;
        self.set(STORE_OVERWRITE, true)?;
        self.set(STORE_FILE_NAME, camera_name)?;
        self.set(STORE_COMMIT, true)?;

        let camera_path = format!("/{camera_name}");
        let bytes = self.wait_for_file(&camera_path)?;

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        std::fs::write(destination, &bytes)?;

        info!(
            "Saved snapshot {camera_path} to {} in {:.3} s",
            destination.display(),
            elapsed(&self.clock, started).as_secs_f64()
        );
        Ok(())
    }

    /// Poll the download endpoint until the camera has finished rendering.
    fn wait_for_file(&self, camera_path: &str) -> Result<Vec<u8>> {
        let started = self.clock.instant();
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.client.download(camera_path)? {
                Download::Ready(bytes) => {
                    debug!(camera_path, attempts, size = bytes.len(), "downloaded");
                    return Ok(bytes);
                }
                Download::NotReady(status) => {
                    let waited = elapsed(&self.clock, started);
                    if let Some(max_wait) = self.poll.max_wait {
                        if waited >= max_wait {
                            return Err(Error::RenderTimeout {
                                file: camera_path.to_string(),
                                waited,
                            });
                        }
                    }
                    debug!(camera_path, attempts, status, "waiting for camera to render");
                    self.clock.sleep(self.poll.backoff);
                }
            }
        }
    }

    /// Hand a snapshot to the thermal extractor and export its data.
    ///
    /// * `image`: radiometric snapshot on disk.
    /// * `csv`: destination of the table, overwritten without asking.
    /// * `plot`: also render a preview.
    pub fn get_csv_data(&mut self, image: &Path, csv: &Path, plot: bool) -> Result<()> {
        let started = self.clock.instant();
        self.extractor.process_image(image)?;
        self.extractor.export_thermal_to_csv(csv)?;
        if plot {
            let preview = self.extractor.plot()?;
            info!("Wrote thermal preview to {}", preview.display());
        }
        info!(
            "Exported thermal data of {} to {} in {:.3} s",
            image.display(),
            csv.display(),
            elapsed(&self.clock, started).as_secs_f64()
        );
        Ok(())
    }

    /// Apply the camera settings of a request in a fixed order: mode,
    /// overlay, light, range, palette. An unknown image type is reported
    /// and skipped.
    pub fn configure(&self, request: &CaptureRequest) -> Result<()> {
        match &request.mode {
            ModeSelection::Set(mode) => {
                self.set_mode(*mode)?;
                info!("Setting {mode} mode");
            }
            ModeSelection::Invalid(raw) => {
                warn!("Wrong argument given to parameter 'type': {raw:?}, keeping current mode");
            }
            ModeSelection::Unchanged => debug!("No image type given, keeping current mode"),
        }

        self.show_overlay(request.show_overlay)?;
        if request.show_overlay {
            info!("Showing the overlay");
        } else {
            info!("Hiding the overlay");
        }

        if let Some(light) = request.light {
            self.light(light.is_on())?;
            if light.is_on() {
                info!("Torchlight activated");
            } else {
                info!("Torchlight deactivated");
            }
        }

        self.apply_range(request.range)?;

        if let Some(palette) = request.palette {
            self.set_palette(palette)?;
            info!("Setting palette {}", palette.file_name());
        }
        Ok(())
    }

    /// Carry out a whole request: configure the camera, then take one
    /// snapshot or keep capturing at an interval, exporting csv data after
    /// each snapshot when asked to.
    pub fn run(&mut self, request: &CaptureRequest) -> Result<()> {
        self.configure(request)?;

        let Some(snapshot) = request.snapshot_target() else {
            if request.interval.is_some() {
                warn!("An interval was given without a snapshot or csv file, nothing to capture");
            }
            return Ok(());
        };

        match request.interval {
            Some(interval) => {
                self.run_interval(
                    &snapshot,
                    request.csv.as_deref(),
                    request.plot,
                    interval,
                    request.count,
                )?;
            }
            None => {
                self.get_snapshot(&snapshot)?;
                if let Some(csv) = &request.csv {
                    self.get_csv_data(&snapshot, csv, request.plot)?;
                }
            }
        }
        Ok(())
    }

    /// Capture timestamped snapshots until `count` is reached, or forever.
    /// A zero interval captures back to back. Returns the number of
    /// captures.
    ///
    /// * `snapshot`: base path for the snapshots.
    /// * `csv`: base path for csv exports, `None` skips the export.
    /// * `plot`: render a preview with every export.
    /// * `interval`: pause between the end of one capture and the next.
    /// * `count`: stop after this many captures.
    pub fn run_interval(
        &mut self,
        snapshot: &Path,
        csv: Option<&Path>,
        plot: bool,
        interval: Duration,
        count: Option<u64>,
    ) -> Result<u64> {
        if count == Some(0) {
            return Ok(0);
        }

        let mut captured: u64 = 0;
        loop {
            let at = self.clock.now();
            let destination = interval_file_name(snapshot, &at);
            let camera_name = destination
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| camera_file_name(&at));
            self.get_snapshot_as(&destination, &camera_name)?;

            if let Some(csv) = csv {
                self.get_csv_data(&destination, &interval_csv_path(csv, &at), plot)?;
            }

            captured += 1;
            if matches!(count, Some(count) if captured >= count) {
                return Ok(captured);
            }
            if !interval.is_zero() {
                self.clock.sleep(interval);
            }
        }
    }
}
