// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod paths;
mod schema;

pub use loader::{expand_env, load};
pub use paths::{checkpoints_dir, data_dir, project_config_dir, sessions_dir};
pub use schema::*;
