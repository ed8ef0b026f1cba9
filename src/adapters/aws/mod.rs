//! AWS SDK adapters. Used against Cloudflare R2 through its S3 API.

pub mod s3;
