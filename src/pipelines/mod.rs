// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines
//!
//! Heavy work runs on background workers so the preview and the controller
//! stay responsive while captures are encoded.
//!
//! # Modules
//!
//! - [`photo`]: Admission, encoding and saving of still captures

pub mod photo;
