//! SCSI pass-through for Linux (`sg`), Windows (SPT) and Haiku.
//!
//! [`pt`] is the transport: build a [`pt::PtRequest`], submit it on a
//! [`pt::PtDevice`], then inspect status, sense and residual. [`cmds`] wraps
//! common commands on top of it, and [`scsi`] holds the CDB builders and
//! response decoders they share.

pub mod cmds;
pub mod config;
pub mod error;
pub mod pt;
pub mod scsi;
