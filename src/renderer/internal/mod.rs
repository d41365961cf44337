pub mod buffers;
pub mod context;
pub mod readback;
