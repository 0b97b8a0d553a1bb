/**
Client for the resource interface of the FLIR AX8 thermal camera. The camera
exposes its whole configuration as a tree of dot delimited resources behind a
small web server; everything here is built from reading and writing those
resources and fetching the files the camera renders.
The layout follows the usual split: devices talk to hardware, components
combine device calls into behaviour, messages describe what a caller wants.
*/

/// Components in the system are created by grouping together
/// device calls into a logical unit that performs some function.
pub mod components;
/// Configuration files for the camera and its schedule.
pub mod config;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Errors shared by every part of the crate.
pub mod error;
/// Subscriber setup for the binaries.
pub mod logging;
/// Requests that describe what a caller wants from the camera.
pub mod messages;
/// Clock abstraction, thermal image decoding and test helpers.
pub mod utils;

pub use error::{Error, Result};
