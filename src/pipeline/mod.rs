// SPDX-License-Identifier: MIT

pub mod builder;
pub mod expression;
pub mod graph;
pub mod job;
pub mod loader;
pub mod render;
pub mod step;
pub mod types;
pub mod workflow;
