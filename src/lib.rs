// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod abstract_camera;
pub mod bayer;
pub mod capture_session;
pub mod config;
pub mod image_camera;
pub mod roi;
pub mod save_gate;
pub mod select_camera;
pub mod temperature;
pub mod temperature_log;
