//! CaptchaHarvester - Bulk captcha capture and recognition
//!
//! Pulls raw captcha images off capture sources, normalizes them into the
//! canonical form a PARSeq-style ONNX model expects, recognizes the text,
//! and persists every capture as exactly one SQLite record. Also exposes a
//! line-oriented stdin/stdout recognition service.

pub mod capture;
pub mod config;
pub mod ocr;
pub mod pipeline;
pub mod service;
pub mod storage;
pub mod vision;
