//! Data models for datasets, objectives and production steps

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rational::{Rational, RationalError};

/// Malformed references inside a dataset or a machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("unknown item '{0}'")]
    UnknownItem(String),
    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),
    #[error("item '{0}' is not a machine")]
    NotAMachine(String),
    #[error("item '{0}' is not a module")]
    NotAModule(String),
    #[error("item '{0}' is not a beacon")]
    NotABeacon(String),
    #[error("item '{0}' is not a fuel")]
    NotAFuel(String),
    #[error("recipe '{0}' has no producer machine")]
    NoProducer(String),
    #[error("machine '{0}' burns fuel but no matching fuel is available")]
    NoFuel(String),
    #[error("'{0}' needs a belt or pipe speed but none is available")]
    NoTransport(String),
    #[error("no wagon can carry item '{0}'")]
    NoWagon(String),
    #[error(transparent)]
    Value(#[from] RationalError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeltData {
    /// Items per second
    pub speed: Rational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelData {
    pub category: String,
    /// Energy value in MJ
    pub value: Rational,
    /// Item left behind after burning, e.g. a depleted cell
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Speed,
    Productivity,
    Consumption,
    Pollution,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleData {
    pub speed: Option<Rational>,
    pub productivity: Option<Rational>,
    pub consumption: Option<Rational>,
    pub pollution: Option<Rational>,
    /// Name of a recipe list this module is restricted to
    pub limitation: Option<String>,
    /// Items sprayed per proliferator item
    pub sprays: Option<Rational>,
    /// Item consumed when spraying, if not the module itself
    pub proliferator: Option<String>,
}

impl ModuleData {
    pub fn effect(&self, effect: Effect) -> Option<&Rational> {
        match effect {
            Effect::Speed => self.speed.as_ref(),
            Effect::Productivity => self.productivity.as_ref(),
            Effect::Consumption => self.consumption.as_ref(),
            Effect::Pollution => self.pollution.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyType {
    #[default]
    Electric,
    Burner,
    /// Needs no energy and never pollutes
    Void,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiloData {
    /// Rocket parts per launch
    pub parts: Rational,
    /// Launch delay in ticks (60 per second)
    pub launch: Rational,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineData {
    /// Crafting speed; machines without one run at belt speed
    pub speed: Option<Rational>,
    /// Module slots
    pub modules: Option<usize>,
    #[serde(rename = "type")]
    pub energy: EnergyType,
    pub fuel_categories: Vec<String>,
    /// Energy usage in kW
    pub usage: Option<Rational>,
    /// Idle drain in kW
    pub drain: Option<Rational>,
    /// Pollution per minute
    pub pollution: Option<Rational>,
    /// Labs are sped up by the research speed bonus
    pub research: bool,
    pub silo: Option<SiloData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconData {
    pub effectivity: Rational,
    #[serde(default)]
    pub modules: usize,
    /// Energy usage in kW
    #[serde(default)]
    pub usage: Option<Rational>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoWagonData {
    /// Number of stacks
    pub size: Rational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidWagonData {
    pub capacity: Rational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub fluid: bool,
    #[serde(default)]
    pub stack: Option<Rational>,
    #[serde(default)]
    pub belt: Option<BeltData>,
    #[serde(default)]
    pub pipe: Option<BeltData>,
    #[serde(default)]
    pub fuel: Option<FuelData>,
    #[serde(default)]
    pub module: Option<ModuleData>,
    #[serde(default)]
    pub machine: Option<MachineData>,
    #[serde(default)]
    pub beacon: Option<BeaconData>,
    #[serde(default)]
    pub cargo_wagon: Option<CargoWagonData>,
    #[serde(default)]
    pub fluid_wagon: Option<FluidWagonData>,
}

impl Item {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            fluid: false,
            stack: None,
            belt: None,
            pipe: None,
            fuel: None,
            module: None,
            machine: None,
            beacon: None,
            cargo_wagon: None,
            fluid_wagon: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_stack(mut self, stack: Rational) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn as_fluid(mut self) -> Self {
        self.fluid = true;
        self
    }

    pub fn with_belt(mut self, speed: Rational) -> Self {
        self.belt = Some(BeltData { speed });
        self
    }

    pub fn with_pipe(mut self, speed: Rational) -> Self {
        self.pipe = Some(BeltData { speed });
        self
    }

    pub fn with_fuel(mut self, fuel: FuelData) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_module(mut self, module: ModuleData) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_machine(mut self, machine: MachineData) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn with_beacon(mut self, beacon: BeaconData) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn with_cargo_wagon(mut self, size: Rational) -> Self {
        self.cargo_wagon = Some(CargoWagonData { size });
        self
    }

    pub fn with_fluid_wagon(mut self, capacity: Rational) -> Self {
        self.fluid_wagon = Some(FluidWagonData { capacity });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeFlags {
    pub mining: bool,
    pub technology: bool,
    /// The recipe burns its own fuel input, so no fuel is added
    pub burner: bool,
    pub rocket_part: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Seconds per cycle at crafting speed 1
    pub time: Rational,
    #[serde(rename = "in", default)]
    pub inputs: BTreeMap<String, Rational>,
    #[serde(rename = "out", default)]
    pub outputs: BTreeMap<String, Rational>,
    /// Output amounts that are returned catalysts and never boosted
    #[serde(default)]
    pub catalyst: BTreeMap<String, Rational>,
    /// Machines able to run this recipe, preferred first
    #[serde(default)]
    pub producers: Vec<String>,
    #[serde(default)]
    pub flags: RecipeFlags,
    #[serde(default)]
    pub cost: Option<Rational>,
    /// Rocket part consumed by a launch recipe
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub disallowed_effects: BTreeSet<Effect>,
}

impl Recipe {
    pub fn new(id: impl Into<String>, name: impl Into<String>, time: Rational) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            time,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            catalyst: BTreeMap::new(),
            producers: Vec::new(),
            flags: RecipeFlags::default(),
            cost: None,
            part: None,
            disallowed_effects: BTreeSet::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_input(mut self, item: impl Into<String>, amount: Rational) -> Self {
        self.inputs.insert(item.into(), amount);
        self
    }

    pub fn with_output(mut self, item: impl Into<String>, amount: Rational) -> Self {
        self.outputs.insert(item.into(), amount);
        self
    }

    pub fn with_catalyst(mut self, item: impl Into<String>, amount: Rational) -> Self {
        self.catalyst.insert(item.into(), amount);
        self
    }

    pub fn with_producer(mut self, machine: impl Into<String>) -> Self {
        self.producers.push(machine.into());
        self
    }

    pub fn with_flags(mut self, flags: RecipeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cost(mut self, cost: Rational) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_part(mut self, part: impl Into<String>) -> Self {
        self.part = Some(part.into());
        self
    }

    pub fn disallow(mut self, effect: Effect) -> Self {
        self.disallowed_effects.insert(effect);
        self
    }
}

/// Item and recipe catalog. Items and recipes live in arenas addressed by
/// index; iteration order is the order they were loaded in.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub items: Vec<Item>,
    pub recipes: Vec<Recipe>,
    pub limitations: BTreeMap<String, BTreeSet<String>>,
    item_index: HashMap<String, usize>,
    recipe_index: HashMap<String, usize>,
}

impl Dataset {
    pub fn new(
        items: Vec<Item>,
        recipes: Vec<Recipe>,
        limitations: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let item_index = items.iter().enumerate().map(|(i, item)| (item.id.clone(), i)).collect();
        let recipe_index = recipes.iter().enumerate().map(|(i, r)| (r.id.clone(), i)).collect();
        Self {
            items,
            recipes,
            limitations,
            item_index,
            recipe_index,
        }
    }

    pub fn item_idx(&self, id: &str) -> Option<usize> {
        self.item_index.get(id).copied()
    }

    pub fn recipe_idx(&self, id: &str) -> Option<usize> {
        self.recipe_index.get(id).copied()
    }

    pub fn item(&self, id: &str) -> Result<&Item, DatasetError> {
        self.item_idx(id)
            .map(|i| &self.items[i])
            .ok_or_else(|| DatasetError::UnknownItem(id.to_string()))
    }

    pub fn recipe(&self, id: &str) -> Result<&Recipe, DatasetError> {
        self.recipe_idx(id)
            .map(|i| &self.recipes[i])
            .ok_or_else(|| DatasetError::UnknownRecipe(id.to_string()))
    }

    pub fn machine(&self, id: &str) -> Result<&MachineData, DatasetError> {
        self.item(id)?
            .machine
            .as_ref()
            .ok_or_else(|| DatasetError::NotAMachine(id.to_string()))
    }

    pub fn module(&self, id: &str) -> Result<&ModuleData, DatasetError> {
        self.item(id)?
            .module
            .as_ref()
            .ok_or_else(|| DatasetError::NotAModule(id.to_string()))
    }

    pub fn beacon(&self, id: &str) -> Result<&BeaconData, DatasetError> {
        self.item(id)?
            .beacon
            .as_ref()
            .ok_or_else(|| DatasetError::NotABeacon(id.to_string()))
    }

    pub fn fuel(&self, id: &str) -> Result<&FuelData, DatasetError> {
        self.item(id)?
            .fuel
            .as_ref()
            .ok_or_else(|| DatasetError::NotAFuel(id.to_string()))
    }

    pub fn belts(&self) -> impl Iterator<Item = (&Item, &BeltData)> {
        self.items.iter().filter_map(|i| i.belt.as_ref().map(|b| (i, b)))
    }

    pub fn pipes(&self) -> impl Iterator<Item = (&Item, &BeltData)> {
        self.items.iter().filter_map(|i| i.pipe.as_ref().map(|b| (i, b)))
    }

    pub fn fuels(&self) -> impl Iterator<Item = (&Item, &FuelData)> {
        self.items.iter().filter_map(|i| i.fuel.as_ref().map(|f| (i, f)))
    }

    /// Check that every id referenced by recipes and capability data exists
    /// and has the right kind.
    pub fn validate(&self) -> Result<(), DatasetError> {
        for recipe in &self.recipes {
            if recipe.producers.is_empty() {
                return Err(DatasetError::NoProducer(recipe.id.clone()));
            }
            for machine in &recipe.producers {
                self.machine(machine)?;
            }
            for id in recipe.inputs.keys().chain(recipe.outputs.keys()).chain(recipe.catalyst.keys()) {
                self.item(id)?;
            }
            if let Some(part) = &recipe.part {
                self.item(part)?;
            }
        }
        for item in &self.items {
            if let Some(result) = item.fuel.as_ref().and_then(|f| f.result.as_ref()) {
                self.item(result)?;
            }
            if let Some(proliferator) = item.module.as_ref().and_then(|m| m.proliferator.as_ref()) {
                self.item(proliferator)?;
            }
        }
        for recipes in self.limitations.values() {
            for id in recipes {
                self.recipe(id)?;
            }
        }
        Ok(())
    }
}

/// A per-recipe rate derived from a base recipe and its machine setup.
/// Rates are per machine cycle; `time` is the cycle length in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedRecipe {
    pub id: String,
    pub machine: String,
    pub time: Rational,
    pub inputs: BTreeMap<String, Rational>,
    pub outputs: BTreeMap<String, Rational>,
    /// Electric power per machine in kW
    pub power: Rational,
    /// Pollution per machine per second
    pub pollution: Rational,
    /// Fuel burned per cycle, already included in `inputs`
    pub fuel: Option<(String, Rational)>,
    /// Proliferator items used per cycle, already included in `inputs`
    pub proliferator_inputs: BTreeMap<String, Rational>,
    pub effects: Effects,
    /// Productivity reduces consumption instead of boosting outputs
    pub adjust_prod: bool,
    pub cost: Rational,
}

/// Accumulated effect multipliers, 1 meaning unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub speed: Rational,
    pub productivity: Rational,
    pub consumption: Rational,
    pub pollution: Rational,
}

impl Default for Effects {
    fn default() -> Self {
        Self {
            speed: Rational::one(),
            productivity: Rational::one(),
            consumption: Rational::one(),
            pollution: Rational::one(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveType {
    Output,
    Input,
    Maximize,
    Limit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveUnit {
    #[default]
    Items,
    Belts,
    Wagons,
    /// Targets a recipe instead of an item
    Machines,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub target_id: String,
    #[serde(default)]
    pub unit: ObjectiveUnit,
    #[serde(rename = "type")]
    pub kind: ObjectiveType,
    pub value: Rational,
}

impl Objective {
    pub fn new(
        id: impl Into<String>,
        target_id: impl Into<String>,
        kind: ObjectiveType,
        unit: ObjectiveUnit,
        value: Rational,
    ) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            unit,
            kind,
            value,
        }
    }

    pub fn is_recipe(&self) -> bool {
        self.unit == ObjectiveUnit::Machines
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectiveParseError {
    #[error("objective '{0}' must look like type:target=value[@unit]")]
    Format(String),
    #[error("unknown objective type '{0}'")]
    Type(String),
    #[error("unknown objective unit '{0}'")]
    Unit(String),
    #[error("invalid objective value: {0}")]
    Value(#[from] RationalError),
}

static OBJECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s*:\s*([^=\s]+)\s*=\s*([^@]+?)\s*(?:@\s*(\w+))?\s*$")
        .expect("objective pattern is valid")
});

impl FromStr for Objective {
    type Err = ObjectiveParseError;

    /// Parses `type:target=value[@unit]`, e.g. `output:iron-plate=60@items`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cap = OBJECTIVE_RE
            .captures(s)
            .ok_or_else(|| ObjectiveParseError::Format(s.to_string()))?;

        let kind = match cap[1].to_ascii_lowercase().as_str() {
            "output" => ObjectiveType::Output,
            "input" => ObjectiveType::Input,
            "maximize" => ObjectiveType::Maximize,
            "limit" => ObjectiveType::Limit,
            other => return Err(ObjectiveParseError::Type(other.to_string())),
        };
        let unit = match cap.get(4).map(|m| m.as_str().to_ascii_lowercase()) {
            None => ObjectiveUnit::Items,
            Some(unit) => match unit.as_str() {
                "items" => ObjectiveUnit::Items,
                "belts" => ObjectiveUnit::Belts,
                "wagons" => ObjectiveUnit::Wagons,
                "machines" => ObjectiveUnit::Machines,
                _ => return Err(ObjectiveParseError::Unit(unit)),
            },
        };
        let value: Rational = cap[3].parse()?;
        let target = cap[2].to_string();

        Ok(Objective::new(format!("{}:{}", cap[1].to_ascii_lowercase(), target), target, kind, unit, value))
    }
}

/// One row of a production plan.
///
/// `parents` maps consuming step ids to the part of this step's items they
/// take; the empty key stands for the objectives themselves. `outputs` maps
/// item ids to the part of that item's total this step's recipe supplies.
/// The solver fills both with absolute rates, the step builder turns them
/// into fractions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub id: String,
    pub item_id: Option<String>,
    pub recipe_id: Option<String>,
    pub items: Option<Rational>,
    pub output: Option<Rational>,
    pub surplus: Option<Rational>,
    pub machines: Option<Rational>,
    pub power: Option<Rational>,
    pub pollution: Option<Rational>,
    pub belts: Option<Rational>,
    pub wagons: Option<Rational>,
    pub parents: BTreeMap<String, Rational>,
    pub outputs: BTreeMap<String, Rational>,
}

/// Parent key used for the share of an item going to the objectives.
pub const OBJECTIVE_PARENT: &str = "";

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(items) = &self.items {
            write!(f, " items={}", items.to_precision(3))?;
        }
        if let Some(recipe) = &self.recipe_id {
            write!(f, " recipe={recipe}")?;
        }
        if let Some(machines) = &self.machines {
            write!(f, " machines={}", machines.to_precision(3))?;
        }
        if let Some(surplus) = &self.surplus {
            write!(f, " surplus={}", surplus.to_precision(3))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_objective_strings() {
        let o: Objective = "output:iron-plate=60".parse().unwrap();
        assert_eq!(o.kind, ObjectiveType::Output);
        assert_eq!(o.target_id, "iron-plate");
        assert_eq!(o.unit, ObjectiveUnit::Items);
        assert_eq!(o.value, Rational::from(60));

        let o: Objective = "Limit:iron-ore = 1 1/2 @belts".parse().unwrap();
        assert_eq!(o.kind, ObjectiveType::Limit);
        assert_eq!(o.unit, ObjectiveUnit::Belts);
        assert_eq!(o.value, Rational::fraction(3, 2));

        let o: Objective = "maximize:rocket-part=1@machines".parse().unwrap();
        assert!(o.is_recipe());
    }

    #[test]
    fn rejects_bad_objectives() {
        assert!(matches!("iron-plate".parse::<Objective>(), Err(ObjectiveParseError::Format(_))));
        assert!(matches!("make:iron=1".parse::<Objective>(), Err(ObjectiveParseError::Type(_))));
        assert!(matches!("output:iron=1@crates".parse::<Objective>(), Err(ObjectiveParseError::Unit(_))));
        assert!(matches!("output:iron=1/0".parse::<Objective>(), Err(ObjectiveParseError::Value(_))));
    }

    #[test]
    fn validate_catches_dangling_references() {
        let furnace = Item::new("furnace", "Furnace").with_machine(MachineData {
            speed: Some(Rational::one()),
            ..MachineData::default()
        });
        let plate = Item::new("plate", "Plate");
        let recipe = Recipe::new("plate", "Plate", Rational::one())
            .with_input("ore", Rational::one())
            .with_output("plate", Rational::one())
            .with_producer("furnace");

        let dataset = Dataset::new(vec![furnace.clone(), plate.clone()], vec![recipe.clone()], BTreeMap::new());
        assert_eq!(dataset.validate(), Err(DatasetError::UnknownItem("ore".into())));

        let ore = Item::new("ore", "Ore");
        let dataset = Dataset::new(vec![furnace, plate.clone(), ore], vec![recipe.clone()], BTreeMap::new());
        assert_eq!(dataset.validate(), Ok(()));

        let dataset = Dataset::new(vec![plate], vec![recipe.with_producer("plate")], BTreeMap::new());
        assert!(dataset.validate().is_err());
    }
}
