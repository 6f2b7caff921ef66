//! Identifiers shared by the test fixtures.

#![allow(dead_code)]

pub const BROODS_ID: &str = "e4d81bd4-7eef-4a8d-9d4e-0c7e4d8c2f5b";
pub const BROODS_NAME: &str = "Broods";
pub const EVERGREEN_ID: &str = "8b4b8f3a-0f0e-4d5c-9a8e-6f1c2b3d4e5f";
pub const CONSCIOUS_ID: &str = "1f2e3d4c-5b6a-4789-8abc-def012345678";
pub const DON_T_FEED_ID: &str = "9a8b7c6d-5e4f-4321-9fed-cba987654321";

pub const SABBATH_ID: &str = "5182c1d9-c7d2-4dad-afa0-ccfeada921a8";
pub const SABBATH_NAME: &str = "Black Sabbath";

pub const TEST_USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

pub const MIB: usize = 1024 * 1024;
