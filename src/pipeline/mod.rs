//! Pipeline stages for two-stage exam-paper OCR.
//!
//! Each submodule implements exactly one transformation step and is tested
//! on its own; [`crate::orchestrator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ crop ──▶ compile ──▶ enhance ──▶ map
//! (base64)  (pdfium)   (basic OCR)  (PNG)   (4-up PDF)  (premium)   (slots)
//! ```
//!
//! 1. [`input`]   — decode the payload and check the PDF signature
//! 2. [`render`]  — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`extract`] — detect question/answer/image entities; one network call
//! 4. [`crop`]    — cut each question/answer out of its page on a worker pool
//! 5. [`compile`] — pack crops four to a Letter page and record where each went
//! 6. [`enhance`] — premium OCR over the compiled PDF; one network call
//! 7. [`map`]     — hand each compiled page's text to the entities on it
//!
//! [`geometry`], [`encode`] and [`segment`] are shared helpers.

pub mod compile;
pub mod crop;
pub mod encode;
pub mod enhance;
pub mod extract;
pub mod geometry;
pub mod input;
pub mod map;
pub mod render;
pub mod segment;
