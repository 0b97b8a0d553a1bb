/// Standardise how a caller describes the work it wants done.
pub mod control {
    /// Capture requests: image mode, overlay, torch, range and
    /// where the results go.
    pub mod capture;
}
