use crate::{
    error::{Error, Result},
    messages::control::capture::KELVIN_OFFSET,
};
use image::{GrayImage, ImageFormat, Luma};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Payload prefix of the APP1 segments that carry the FLIR file format.
const FLIR_SEGMENT_MAGIC: &[u8] = b"FLIR\0";
/// Magic, version byte, segment index, index of the last segment.
const FLIR_SEGMENT_HEADER: usize = 8;
const FFF_HEADER_SIZE: usize = 0x40;
const FFF_DIRECTORY_ENTRY_SIZE: usize = 0x20;
const RECORD_RAW_DATA: u16 = 0x0001;
const RECORD_CAMERA_INFO: u16 = 0x0020;
/// Pixel data of the raw record starts after its header.
const RAW_DATA_OFFSET: usize = 0x20;
const CAMERA_INFO_SIZE: usize = 0x310;
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// The decoding library a snapshot is handed to for the csv export. The
/// acquisition code only relies on this call contract.
pub trait ThermalExtractor {
    /// Read a radiometric jpeg and convert its raw sensor counts to
    /// temperatures.
    ///
    /// * `path`: snapshot downloaded from the camera.
    fn process_image(&mut self, path: &Path) -> Result<()>;

    /// Write one row per pixel to a csv file.
    ///
    /// * `path`: destination, overwritten without asking.
    fn export_thermal_to_csv(&self, path: &Path) -> Result<()>;

    /// Render a preview of the processed temperatures and return where it
    /// was written.
    fn plot(&self) -> Result<PathBuf>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// Bounds checked reads out of a record.
struct Reader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.data
            .get(offset..offset + N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| Error::ThermalData(format!("read past end of record at {offset:#x}")))
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        let bytes = self.bytes::<2>(offset)?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        let bytes = self.bytes::<4>(offset)?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn i32(&self, offset: usize) -> Result<i32> {
        Ok(self.u32(offset)? as i32)
    }

    fn f32(&self, offset: usize) -> Result<f64> {
        Ok(f64::from(f32::from_bits(self.u32(offset)?)))
    }
}

/// Records start with the value 2 in their own byte order.
fn record_order(record: &[u8]) -> ByteOrder {
    match record {
        [lo, hi, ..] if u16::from_le_bytes([*lo, *hi]) < 0x100 => ByteOrder::Little,
        _ => ByteOrder::Big,
    }
}

/// Collect the FLIR APP1 segments of a jpeg in index order and join them
/// into the embedded FFF file.
///
/// * `jpeg`: the whole snapshot file.
pub fn flir_segments(jpeg: &[u8]) -> Result<Vec<u8>> {
    if !jpeg.starts_with(&[0xff, 0xd8]) {
        return Err(Error::ThermalData(String::from("not a jpeg file")));
    }

    let mut segments: Vec<(u8, &[u8])> = Vec::new();
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xff {
            return Err(Error::ThermalData(format!("corrupt jpeg marker at {pos:#x}")));
        }
        let marker = jpeg[pos + 1];
        match marker {
            // Fill byte.
            0xff => {
                pos += 1;
                continue;
            }
            // Start of scan or end of image, no more metadata.
            0xda | 0xd9 => break,
            // Markers without a length field.
            0x01 | 0xd0..=0xd7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        let length = usize::from(u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]));
        let end = pos + 2 + length;
        if length < 2 || end > jpeg.len() {
            return Err(Error::ThermalData(format!("truncated jpeg segment at {pos:#x}")));
        }
        let payload = &jpeg[pos + 4..end];
        if marker == 0xe1
            && payload.starts_with(FLIR_SEGMENT_MAGIC)
            && payload.len() >= FLIR_SEGMENT_HEADER
        {
            segments.push((payload[6], &payload[FLIR_SEGMENT_HEADER..]));
        }
        pos = end;
    }

    if segments.is_empty() {
        return Err(Error::ThermalData(String::from(
            "no FLIR segments, image is not radiometric",
        )));
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments
        .into_iter()
        .flat_map(|(_, data)| data.iter().copied())
        .collect())
}

/// Entry of the FFF record directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FffRecord {
    kind: u16,
    offset: usize,
    length: usize,
}

fn parse_records(fff: &[u8]) -> Result<Vec<FffRecord>> {
    if fff.len() < FFF_HEADER_SIZE || !(fff.starts_with(b"FFF\0") || fff.starts_with(b"AFF\0")) {
        return Err(Error::ThermalData(String::from("missing FFF header")));
    }

    // The version field is somewhere in 100..200 when read in the
    // file's byte order.
    let order = [ByteOrder::Little, ByteOrder::Big]
        .into_iter()
        .find(|order| {
            Reader { data: fff, order: *order }
                .u32(0x14)
                .map(|version| (100..200).contains(&version))
                .unwrap_or(false)
        })
        .ok_or_else(|| Error::ThermalData(String::from("unknown FFF version")))?;
    let reader = Reader { data: fff, order };

    let directory = reader.u32(0x18)? as usize;
    let entries = reader.u32(0x1c)? as usize;
    // The count comes straight from the file, check it before allocating.
    let fits = entries
        .checked_mul(FFF_DIRECTORY_ENTRY_SIZE)
        .and_then(|size| size.checked_add(directory))
        .map_or(false, |end| end <= fff.len());
    if !fits {
        return Err(Error::ThermalData(format!(
            "record directory of {entries} entries at {directory:#x} does not fit the file"
        )));
    }
    let mut records = Vec::with_capacity(entries);
    for index in 0..entries {
        let entry = directory + index * FFF_DIRECTORY_ENTRY_SIZE;
        let kind = reader.u16(entry)?;
        if kind == 0 {
            continue;
        }
        let record = FffRecord {
            kind,
            offset: reader.u32(entry + 12)? as usize,
            length: reader.u32(entry + 16)? as usize,
        };
        if record.offset.checked_add(record.length).map_or(true, |end| end > fff.len()) {
            return Err(Error::ThermalData(format!(
                "record {kind:#x} points past the end of the file"
            )));
        }
        records.push(record);
    }
    Ok(records)
}

fn record_data<'a>(fff: &'a [u8], records: &[FffRecord], kind: u16) -> Result<&'a [u8]> {
    records
        .iter()
        .find(|record| record.kind == kind)
        .map(|record| &fff[record.offset..record.offset + record.length])
        .ok_or_else(|| Error::ThermalData(format!("missing record {kind:#x}")))
}

/// Sensor counts straight from the raw data record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawThermal {
    pub width: u32,
    pub height: u32,
    /// Row major.
    pub counts: Vec<u16>,
}

fn parse_raw_data(record: &[u8]) -> Result<RawThermal> {
    let reader = Reader {
        data: record,
        order: record_order(record),
    };
    let width = u32::from(reader.u16(0x02)?);
    let height = u32::from(reader.u16(0x04)?);
    let pixels = (width * height) as usize;
    let data = record
        .get(RAW_DATA_OFFSET..)
        .ok_or_else(|| Error::ThermalData(String::from("raw data record too short")))?;

    let counts: Vec<u16> = if data.starts_with(PNG_SIGNATURE) {
        let png = image::load_from_memory_with_format(data, ImageFormat::Png)?.into_luma16();
        if png.width() != width || png.height() != height {
            return Err(Error::ThermalData(format!(
                "raw png is {}x{}, record says {width}x{height}",
                png.width(),
                png.height()
            )));
        }
        // The camera writes little endian words into the big endian png.
        png.into_raw().into_iter().map(u16::swap_bytes).collect()
    } else {
        let words = Reader {
            data,
            order: reader.order,
        };
        (0..pixels)
            .map(|pixel| words.u16(pixel * 2))
            .collect::<Result<_>>()?
    };

    if counts.len() != pixels {
        return Err(Error::ThermalData(String::from("raw data size mismatch")));
    }
    Ok(RawThermal {
        width,
        height,
        counts,
    })
}

/// Calibration and environment parameters stored by the camera next to
/// every radiometric image. Temperatures are in Celsius, humidity in
/// percent, distance in metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraInfo {
    pub emissivity: f64,
    pub object_distance: f64,
    pub reflected_temp_c: f64,
    pub atmospheric_temp_c: f64,
    pub ir_window_temp_c: f64,
    pub ir_window_transmission: f64,
    pub relative_humidity: f64,
    pub planck_r1: f64,
    pub planck_r2: f64,
    pub planck_b: f64,
    pub planck_f: f64,
    pub planck_o: f64,
    pub atmospheric_trans_alpha1: f64,
    pub atmospheric_trans_alpha2: f64,
    pub atmospheric_trans_beta1: f64,
    pub atmospheric_trans_beta2: f64,
    pub atmospheric_trans_x: f64,
}

fn parse_camera_info(record: &[u8]) -> Result<CameraInfo> {
    if record.len() < CAMERA_INFO_SIZE {
        return Err(Error::ThermalData(String::from("camera info record too short")));
    }
    let reader = Reader {
        data: record,
        order: record_order(record),
    };
    let humidity = reader.f32(0x3c)?;
    Ok(CameraInfo {
        emissivity: reader.f32(0x20)?,
        object_distance: reader.f32(0x24)?,
        reflected_temp_c: reader.f32(0x28)? - KELVIN_OFFSET,
        atmospheric_temp_c: reader.f32(0x2c)? - KELVIN_OFFSET,
        ir_window_temp_c: reader.f32(0x30)? - KELVIN_OFFSET,
        ir_window_transmission: reader.f32(0x34)?,
        // Stored as a fraction by most firmware, as percent by some.
        relative_humidity: if humidity > 2.0 {
            humidity
        } else {
            humidity * 100.0
        },
        planck_r1: reader.f32(0x58)?,
        planck_b: reader.f32(0x5c)?,
        planck_f: reader.f32(0x60)?,
        atmospheric_trans_alpha1: reader.f32(0x70)?,
        atmospheric_trans_alpha2: reader.f32(0x74)?,
        atmospheric_trans_beta1: reader.f32(0x78)?,
        atmospheric_trans_beta2: reader.f32(0x7c)?,
        atmospheric_trans_x: reader.f32(0x80)?,
        planck_o: f64::from(reader.i32(0x308)?),
        planck_r2: reader.f32(0x30c)?,
    })
}

impl CameraInfo {
    /// Radiance in sensor counts of a black body at `celsius`.
    fn counts_at(&self, celsius: f64) -> f64 {
        self.planck_r1
            / (self.planck_r2 * ((self.planck_b / (celsius + KELVIN_OFFSET)).exp() - self.planck_f))
            - self.planck_o
    }

    /// Convert a raw sensor count to the object temperature, compensating
    /// for emissivity, reflections, the atmosphere and the IR window.
    ///
    /// * `raw`: sensor count of one pixel.
    pub fn raw_to_celsius(&self, raw: f64) -> f64 {
        let emissivity = self.emissivity;
        let window = self.ir_window_transmission;
        let window_emissivity = 1.0 - window;
        let window_reflection = 0.0;

        let at = self.atmospheric_temp_c;
        let h2o = (self.relative_humidity / 100.0)
            * (1.5587 + 0.06939 * at - 0.00027816 * at.powi(2) + 0.00000068455 * at.powi(3)).exp();
        let distance = (self.object_distance / 2.0).sqrt();
        let tau = self.atmospheric_trans_x
            * (-distance * (self.atmospheric_trans_alpha1 + self.atmospheric_trans_beta1 * h2o.sqrt()))
                .exp()
            + (1.0 - self.atmospheric_trans_x)
                * (-distance
                    * (self.atmospheric_trans_alpha2 + self.atmospheric_trans_beta2 * h2o.sqrt()))
                .exp();

        let reflected = self.counts_at(self.reflected_temp_c);
        let atmosphere = self.counts_at(at);
        let window_counts = self.counts_at(self.ir_window_temp_c);

        let reflected_before_window = (1.0 - emissivity) / emissivity * reflected;
        let atmosphere_before_window = (1.0 - tau) / emissivity / tau * atmosphere;
        let window_emission = window_emissivity / emissivity / tau / window * window_counts;
        let window_reflected = window_reflection / emissivity / tau / window * reflected;
        let atmosphere_after_window = (1.0 - tau) / emissivity / tau / window / tau * atmosphere;

        let object = raw / emissivity / tau / window / tau
            - atmosphere_before_window
            - atmosphere_after_window
            - window_emission
            - reflected_before_window
            - window_reflected;

        self.planck_b / (self.planck_r1 / (self.planck_r2 * (object + self.planck_o)) + self.planck_f).ln()
            - KELVIN_OFFSET
    }
}

/// Per pixel object temperatures of one snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ThermalImage {
    pub width: u32,
    pub height: u32,
    /// Row major, degrees Celsius.
    pub celsius: Vec<f64>,
}

impl ThermalImage {
    /// Decode the radiometric payload of a FLIR jpeg.
    ///
    /// * `jpeg`: the whole snapshot file.
    pub fn from_jpeg(jpeg: &[u8]) -> Result<Self> {
        let fff = flir_segments(jpeg)?;
        let records = parse_records(&fff)?;
        let raw = parse_raw_data(record_data(&fff, &records, RECORD_RAW_DATA)?)?;
        let info = parse_camera_info(record_data(&fff, &records, RECORD_CAMERA_INFO)?)?;
        debug!(width = raw.width, height = raw.height, ?info, "decoded radiometric data");

        Ok(Self {
            width: raw.width,
            height: raw.height,
            celsius: raw
                .counts
                .iter()
                .map(|count| info.raw_to_celsius(f64::from(*count)))
                .collect(),
        })
    }

    /// Temperature at `row`, `column`.
    pub fn get(&self, row: u32, column: u32) -> Option<f64> {
        if row >= self.height || column >= self.width {
            return None;
        }
        self.celsius.get((row * self.width + column) as usize).copied()
    }

    /// Coldest and hottest pixel.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.celsius.iter().fold(None, |bounds, value| match bounds {
            None => Some((*value, *value)),
            Some((low, high)) => Some((low.min(*value), high.max(*value))),
        })
    }
}

/// Extracts the thermal data embedded in FLIR radiometric jpegs.
#[derive(Default)]
pub struct FlirImageExtractor {
    source: Option<PathBuf>,
    thermal: Option<ThermalImage>,
}

impl FlirImageExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thermal(&self) -> Option<&ThermalImage> {
        self.thermal.as_ref()
    }

    fn processed(&self) -> Result<(&Path, &ThermalImage)> {
        match (&self.source, &self.thermal) {
            (Some(source), Some(thermal)) => Ok((source, thermal)),
            _ => Err(Error::ThermalData(String::from("no image processed yet"))),
        }
    }
}

impl ThermalExtractor for FlirImageExtractor {
    fn process_image(&mut self, path: &Path) -> Result<()> {
        let jpeg = std::fs::read(path)?;
        self.thermal = Some(ThermalImage::from_jpeg(&jpeg)?);
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    fn export_thermal_to_csv(&self, path: &Path) -> Result<()> {
        let (_, thermal) = self.processed()?;
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["x", "y", "temp (c)"])?;
        for row in 0..thermal.height {
            for column in 0..thermal.width {
                let celsius = thermal.celsius[(row * thermal.width + column) as usize];
                writer.write_record([row.to_string(), column.to_string(), celsius.to_string()])?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn plot(&self) -> Result<PathBuf> {
        let (source, thermal) = self.processed()?;
        let (low, high) = thermal
            .bounds()
            .ok_or_else(|| Error::ThermalData(String::from("empty thermal image")))?;
        let span = if high > low { high - low } else { 1.0 };

        let preview = GrayImage::from_fn(thermal.width, thermal.height, |column, row| {
            let celsius = thermal.celsius[(row * thermal.width + column) as usize];
            Luma([(((celsius - low) / span) * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("snapshot"));
        let path = source.with_file_name(format!("{stem}_thermal.png"));
        preview.save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    }
}


#[cfg(test)]
mod tests {
    use super::{synthetic::*, *};
    use rstest::rstest;

    fn scene(info: &CameraInfo) -> (u16, u16, Vec<u16>) {
        // 3 x 2 image, one pixel per temperature.
        let temperatures = [20.0, 25.0, 30.0, 35.0, 40.0, 45.0];
        let counts = temperatures.iter().map(|t| counts_for(info, *t)).collect();
        (3, 2, counts)
    }

    #[rstest]
    #[case(-10.0)]
    #[case(20.0)]
    #[case(36.6)]
    #[case(120.0)]
    fn test_planck_round_trip_without_compensation(#[case] celsius: f64) {
        let info = ideal_info();
        let raw = info.counts_at(celsius);
        assert!((info.raw_to_celsius(raw) - celsius).abs() < 1e-6);
    }

    #[test]
    fn test_lower_emissivity_reads_hotter_than_counts_suggest() {
        let ideal = ideal_info();
        let raw = ideal.counts_at(40.0);
        let matte = CameraInfo {
            emissivity: 0.9,
            ..ideal
        };
        assert!(matte.raw_to_celsius(raw) > 40.0);
    }

    #[test]
    fn test_decode_raw_counts() {
        let info = ideal_info();
        let (width, height, counts) = scene(&info);
        let jpeg = radiometric_jpeg(width, height, &counts, &info);

        let thermal = ThermalImage::from_jpeg(&jpeg).expect("Failed to decode");
        assert_eq!((thermal.width, thermal.height), (3, 2));
        let first = thermal.get(0, 0).expect("Missing pixel");
        let last = thermal.get(1, 2).expect("Missing pixel");
        assert!((first - 20.0).abs() < 0.05, "first pixel {first}");
        assert!((last - 45.0).abs() < 0.05, "last pixel {last}");
        assert_eq!(thermal.get(2, 0), None);
    }

    #[test]
    fn test_decode_png_counts() {
        let info = ideal_info();
        let (width, height, counts) = scene(&info);
        let raw = ThermalImage::from_jpeg(&radiometric_jpeg(width, height, &counts, &info))
            .expect("Failed to decode raw");
        let png = ThermalImage::from_jpeg(&radiometric_png_jpeg(width, height, &counts, &info))
            .expect("Failed to decode png");
        assert_eq!(raw, png);
    }

    #[rstest]
    #[case(u32::MAX)]
    #[case(3)]
    fn test_oversized_record_directory_is_rejected(#[case] entries: u32) {
        let mut file = synthetic::fff(&[(RECORD_CAMERA_INFO, vec![0; 8])]);
        file[0x1c..0x20].copy_from_slice(&entries.to_le_bytes());
        let jpeg = synthetic::jpeg_with_fff(&file, 200);
        assert!(matches!(
            ThermalImage::from_jpeg(&jpeg),
            Err(Error::ThermalData(_))
        ));
    }

    #[test]
    fn test_plain_jpeg_is_rejected() {
        let jpeg = [0xff, 0xd8, 0xff, 0xe0, 0x00, 0x04, 0x00, 0x00, 0xff, 0xd9];
        assert!(matches!(
            ThermalImage::from_jpeg(&jpeg),
            Err(Error::ThermalData(_))
        ));
        assert!(matches!(
            ThermalImage::from_jpeg(b"not an image"),
            Err(Error::ThermalData(_))
        ));
    }

    #[test]
    fn test_export_csv_and_plot() {
        let info = ideal_info();
        let (width, height, counts) = scene(&info);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let snapshot = dir.path().join("shot.jpg");
        std::fs::write(&snapshot, radiometric_jpeg(width, height, &counts, &info))
            .expect("Failed to write snapshot");

        let mut extractor = FlirImageExtractor::new();
        extractor
            .process_image(&snapshot)
            .expect("Failed to process image");

        let csv_path = dir.path().join("shot.csv");
        extractor
            .export_thermal_to_csv(&csv_path)
            .expect("Failed to export csv");
        let mut reader = csv::Reader::from_path(&csv_path).expect("Failed to open csv");
        let headers: Vec<String> = reader
            .headers()
            .expect("Missing header")
            .iter()
            .map(String::from)
            .collect();
        assert_eq!(headers, vec!["x", "y", "temp (c)"]);
        let rows: Vec<csv::StringRecord> = reader
            .records()
            .collect::<std::result::Result<_, _>>()
            .expect("Failed to read rows");
        assert_eq!(rows.len(), 6);
        assert_eq!(&rows[4][0], "1");
        assert_eq!(&rows[4][1], "1");
        let celsius: f64 = rows[4][2].parse().expect("Not a number");
        assert!((celsius - 40.0).abs() < 0.05);

        let preview = extractor.plot().expect("Failed to plot");
        assert_eq!(preview, dir.path().join("shot_thermal.png"));
        let rendered = image::open(&preview).expect("Failed to open preview").into_luma8();
        assert_eq!(rendered.dimensions(), (3, 2));
        assert_eq!(rendered.get_pixel(0, 0).0, [0]);
        assert_eq!(rendered.get_pixel(2, 1).0, [255]);
    }

    #[test]
    fn test_export_before_processing_fails() {
        let extractor = FlirImageExtractor::new();
        assert!(matches!(
            extractor.export_thermal_to_csv(Path::new("unused.csv")),
            Err(Error::ThermalData(_))
        ));
        assert!(matches!(extractor.plot(), Err(Error::ThermalData(_))));
    }
}
