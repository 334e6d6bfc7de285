// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — builds the capture and delivery subsystems from the
// on-disk configuration.

pub mod agent_services;
pub mod data_dir;
