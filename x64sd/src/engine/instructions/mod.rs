mod control_flow;
mod data_transfer;
mod packed_misc;
mod sse_arithmetic;
mod sse_comparison;
mod sse_conversion;
