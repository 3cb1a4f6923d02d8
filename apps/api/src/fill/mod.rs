// Fill Service
// Orchestrates the matcher over whole forms: batch resolution with per-field accounting,
// the current job context, the response archive, and the HTTP handlers on top.

pub mod archive;
pub mod batch;
pub mod handlers;
pub mod job_context;
