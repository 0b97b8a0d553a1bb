/// Components that work with the thermal camera.
pub mod thermal {
    /// Mode, overlay, range and snapshot control of the camera.
    pub mod acquisition;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::thermal::acquisition::*;
    pub use crate::config::{Ax8Config, ScheduleConfig};
    pub use crate::devices::hardware::camera::{CameraSession, ResourceApi, ResourceClient};
    pub use crate::messages::control::capture::*;
}
