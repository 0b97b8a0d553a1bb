/// Time source for file names, timing and waiting.
pub mod clock;
/// Radiometric data embedded in FLIR jpeg files.
pub mod image;
