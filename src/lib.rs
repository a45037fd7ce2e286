/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod config;
pub mod engine;
pub mod guardfile;
pub mod path;
pub mod platform;
pub mod registry;
pub mod secure;
