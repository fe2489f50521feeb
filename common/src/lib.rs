//! Wire types shared between the backend and device/client code.

pub mod req;
