//! Silicon model of the token-generation accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a pure
//! model of the HLS kernel's control interface: register offsets, control and
//! interrupt bits, and the word layouts of `config_in` and `status_out`.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | AXI-Lite register map, AP_CTRL / GIE / status-valid bits |
//! | [`config`] | `config_in` record (38 words) and field positions |
//! | [`status`] | `status_out` record (4 words), flag bits, EOS sentinel |
//! | [`irq`] | Interrupt sources and ISR decoding |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod irq;
pub mod regs;
pub mod status;

pub use config::{ConfigWord, ConfigWords};
pub use irq::InterruptEvent;
pub use status::{StatusWord, StatusWords, EOS_TOKEN};
