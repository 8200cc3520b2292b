//! Factory production planner
//!
//! Plans production chains for factory building games: adjusts recipes for
//! machines, modules and beacons, solves the recipe graph as a linear
//! program and reports exact machine counts and item rates.

pub mod adjust;
pub mod calculator;
pub mod db;
pub mod import;
pub mod logging;
pub mod lp;
pub mod models;
pub mod rational;
pub mod sample;
pub mod settings;
pub mod solver;
pub mod steps;
