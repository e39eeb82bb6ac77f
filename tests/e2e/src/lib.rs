//! AppShell End-to-End Testing Framework
//!
//! Scripted hosts and a harness for driving the shell worker the way a
//! browser would: lifecycle events, page messages and navigations.

pub mod harness;

pub use fixtures::{FailingCacheStorage, HtmlFixtures, ScriptedNetwork, ORIGIN};
pub use harness::{navigate, url, TestHarness};
