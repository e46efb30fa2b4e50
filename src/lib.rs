// lib.rs
pub mod alignment_record;
pub mod bed;
pub mod classify;
pub mod commands;
pub mod key;
pub mod mapper;
pub mod pipeline;
pub mod reducer;
pub mod region;
pub mod region_index;
pub mod samples;
pub mod shuffle;
pub mod sink;
