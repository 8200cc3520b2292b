//! Global planner settings and per-recipe machine configuration

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::{BeltData, Dataset, Item};
use crate::rational::Rational;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayRate {
    Second,
    #[default]
    Minute,
    Hour,
}

impl DisplayRate {
    /// Seconds per display period.
    pub fn value(self) -> Rational {
        match self {
            DisplayRate::Second => Rational::one(),
            DisplayRate::Minute => Rational::from(60),
            DisplayRate::Hour => Rational::from(3600),
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            DisplayRate::Second => "/s",
            DisplayRate::Minute => "/m",
            DisplayRate::Hour => "/h",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaximizeType {
    /// Each maximized target is rewarded by its own weight
    #[default]
    Weight,
    /// Maximized targets are held in the given ratio to each other
    Ratio,
}

/// Objective function weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    /// Per machine, multiplied by the recipe cost
    pub machine: Rational,
    /// Per item/s of an item nothing reachable produces
    pub unproduceable: Rational,
    /// Per item/s of an excluded item
    pub excluded: Rational,
    pub surplus: Rational,
    /// Per unit of a maximized target; negative to reward
    pub maximize: Rational,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            machine: Rational::one(),
            unproduceable: Rational::from(1_000_000),
            excluded: Rational::zero(),
            surplus: Rational::zero(),
            maximize: Rational::from(-1_000_000_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    pub id: String,
    /// Beacons affecting the machine; may be fractional when shared
    pub count: Rational,
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Defaults to the recipe's first producer
    pub machine: Option<String>,
    pub modules: Vec<String>,
    pub beacons: Vec<BeaconConfig>,
    /// Percent, 100 meaning stock speed
    pub overclock: Option<Rational>,
    pub fuel: Option<String>,
    pub cost: Option<Rational>,
}

impl MachineConfig {
    pub fn for_machine(machine: impl Into<String>) -> Self {
        Self {
            machine: Some(machine.into()),
            ..Self::default()
        }
    }

    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_beacon<I, S>(mut self, id: impl Into<String>, count: Rational, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.beacons.push(BeaconConfig {
            id: id.into(),
            count,
            modules: modules.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_overclock(mut self, percent: Rational) -> Self {
        self.overclock = Some(percent);
        self
    }

    pub fn with_fuel(mut self, fuel: impl Into<String>) -> Self {
        self.fuel = Some(fuel.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mining productivity bonus in percent
    pub mining_bonus: Rational,
    /// Research speed multiplier applied to labs
    pub research_speed: Rational,
    /// Proliferator used to spray proliferator items
    pub proliferator_spray: Option<String>,
    pub belt: Option<String>,
    pub pipe: Option<String>,
    pub fuel: Option<String>,
    pub cargo_wagon: Option<String>,
    pub fluid_wagon: Option<String>,
    pub display_rate: DisplayRate,
    pub maximize_type: MaximizeType,
    pub costs: CostSettings,
    /// Items taken as external inputs instead of being produced
    pub excluded_items: BTreeSet<String>,
    /// Recipes the solver never uses
    pub excluded_recipes: BTreeSet<String>,
    /// Machine configuration keyed by recipe id
    pub machines: BTreeMap<String, MachineConfig>,
    /// Skip solving entirely
    pub paused: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mining_bonus: Rational::zero(),
            research_speed: Rational::one(),
            proliferator_spray: None,
            belt: None,
            pipe: None,
            fuel: None,
            cargo_wagon: None,
            fluid_wagon: None,
            display_rate: DisplayRate::default(),
            maximize_type: MaximizeType::default(),
            costs: CostSettings::default(),
            excluded_items: BTreeSet::new(),
            excluded_recipes: BTreeSet::new(),
            machines: BTreeMap::new(),
            paused: false,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file; missing fields keep their defaults.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let settings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn machine_config(&self, recipe_id: &str) -> Option<&MachineConfig> {
        self.machines.get(recipe_id)
    }

    /// Selected belt, or the first belt in the dataset.
    pub fn belt<'a>(&self, dataset: &'a Dataset) -> Option<&'a BeltData> {
        select(dataset, self.belt.as_deref(), |i| i.belt.as_ref())
    }

    /// Selected pipe, or the first pipe in the dataset.
    pub fn pipe<'a>(&self, dataset: &'a Dataset) -> Option<&'a BeltData> {
        select(dataset, self.pipe.as_deref(), |i| i.pipe.as_ref())
    }

    /// Items per second one transport line moves for the given item.
    pub fn transport_speed(&self, dataset: &Dataset, item: &Item) -> Option<Rational> {
        let line = if item.fluid { self.pipe(dataset) } else { self.belt(dataset) };
        line.map(|b| b.speed.clone())
    }

    /// Items one wagon carries for the given item.
    pub fn wagon_capacity(&self, dataset: &Dataset, item: &Item) -> Option<Rational> {
        if item.fluid {
            select(dataset, self.fluid_wagon.as_deref(), |i| i.fluid_wagon.as_ref())
                .map(|w| w.capacity.clone())
        } else {
            let wagon = select(dataset, self.cargo_wagon.as_deref(), |i| i.cargo_wagon.as_ref())?;
            item.stack.as_ref().map(|stack| &wagon.size * stack)
        }
    }
}

fn select<'a, T>(
    dataset: &'a Dataset,
    chosen: Option<&str>,
    capability: impl Fn(&'a Item) -> Option<&'a T>,
) -> Option<&'a T> {
    match chosen {
        Some(id) => dataset.item(id).ok().and_then(&capability),
        None => dataset.items.iter().find_map(capability),
    }
}
