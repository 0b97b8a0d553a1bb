/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Device interface for the AX8 web server.
    pub mod camera;
}
