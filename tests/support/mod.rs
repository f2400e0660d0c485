#![allow(dead_code)]

pub mod builders;
pub mod fakes;

use sheetops::config::SheetOpsConfig;

pub use builders::{grid, sheet};
pub use fakes::{FakeBroker, FakeSheets, ScriptedAgent, Scripted};

pub fn test_config() -> SheetOpsConfig {
    SheetOpsConfig {
        user_id: "tester".to_string(),
        ..SheetOpsConfig::default()
    }
}
