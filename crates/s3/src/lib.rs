//! mpx-s3: S3 SDK adapter for mpx
//!
//! This crate implements the `MultipartTransport` trait from mpx-core
//! using the aws-sdk-s3 crate, so the transfer engine can drive any
//! S3-compatible endpoint.

pub mod client;

pub use client::S3Client;
