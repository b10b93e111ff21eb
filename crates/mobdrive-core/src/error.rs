//! Crate-wide error type.

use thiserror::Error;

use crate::capabilities::ConfigurationError;
use crate::driver::DriverError;
use crate::interaction::InteractionError;
use crate::locator::LocateError;
use crate::session::SessionError;

/// Any error the harness core can report.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Interaction(#[from] InteractionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
