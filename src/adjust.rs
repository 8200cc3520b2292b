//! Recipe adjustment
//!
//! Turns a base recipe plus its machine, module, beacon, proliferator and
//! overclock configuration into effective cycle time, outputs, power and
//! pollution. All arithmetic is exact except the overclock power curve.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::{
    AdjustedRecipe, Dataset, DatasetError, Effect, Effects, EnergyType, MachineData, ModuleData,
    Recipe,
};
use crate::rational::Rational;
use crate::settings::{MachineConfig, Settings};

/// Effect multipliers never drop below 1/5.
pub const MIN_EFFECT: (i64, i64) = (1, 5);

/// Overclocked power grows with this power of the clock factor.
pub const OVERCLOCK_POWER_EXPONENT: f64 = 1.321928;

/// Machine pollution is given per minute; steps use per second.
pub const POLLUTION_PER_MINUTE: i64 = 60;

/// Game ticks per second, used for silo launch delays.
pub const TICKS_PER_SECOND: i64 = 60;

/// A dataset's recipes after adjustment, in dataset order.
#[derive(Debug, Clone)]
pub struct AdjustedDataset<'a> {
    pub dataset: &'a Dataset,
    pub recipes: Vec<AdjustedRecipe>,
}

impl AdjustedDataset<'_> {
    pub fn recipe(&self, id: &str) -> Option<&AdjustedRecipe> {
        self.dataset.recipe_idx(id).map(|i| &self.recipes[i])
    }
}

/// Adjust every recipe of a dataset with the current settings.
pub fn adjust_dataset<'a>(
    dataset: &'a Dataset,
    settings: &Settings,
) -> Result<AdjustedDataset<'a>, DatasetError> {
    let mut recipes = dataset
        .recipes
        .iter()
        .map(|recipe| adjust_recipe(recipe, settings.machine_config(&recipe.id), settings, dataset))
        .collect::<Result<Vec<_>, _>>()?;
    adjust_silo_recipes(dataset, &mut recipes)?;
    Ok(AdjustedDataset { dataset, recipes })
}

/// Adjust a single recipe. A missing configuration means the recipe's first
/// producer with no modules, beacons or overclock.
pub fn adjust_recipe(
    recipe: &Recipe,
    config: Option<&MachineConfig>,
    settings: &Settings,
    dataset: &Dataset,
) -> Result<AdjustedRecipe, DatasetError> {
    let default_config = MachineConfig::default();
    let config = config.unwrap_or(&default_config);

    let machine_id = config
        .machine
        .as_deref()
        .or_else(|| recipe.producers.first().map(String::as_str))
        .ok_or_else(|| DatasetError::NoProducer(recipe.id.clone()))?;
    let machine = dataset.machine(machine_id)?;

    let machine_speed = match &machine.speed {
        Some(speed) => speed.clone(),
        None => slowest_transport(settings, dataset)
            .ok_or_else(|| DatasetError::NoTransport(machine_id.to_string()))?,
    };
    let mut time = recipe.time.checked_div(&machine_speed)?;
    if machine.research {
        time = time.checked_div(&settings.research_speed)?;
    }

    let mut effects = Effects::default();
    if recipe.flags.mining {
        effects.productivity += &settings.mining_bonus / Rational::from(100);
    }

    let mut sprays = Vec::new();
    for module_id in &config.modules {
        let module = dataset.module(module_id)?;
        if !module_allowed(module, recipe, dataset) {
            debug!(recipe = %recipe.id, module = %module_id, "module not allowed, ignoring");
            continue;
        }
        apply_module(&mut effects, module, &Rational::one(), recipe);
        if module.sprays.is_some() {
            sprays.push(proliferator_usage(module_id, module, settings, dataset)?);
        }
    }

    let mut beacon_power = Rational::zero();
    for beacon_config in &config.beacons {
        let beacon = dataset.beacon(&beacon_config.id)?;
        let factor = &beacon_config.count * &beacon.effectivity;
        for module_id in &beacon_config.modules {
            let module = dataset.module(module_id)?;
            if module_allowed(module, recipe, dataset) {
                apply_module(&mut effects, module, &factor, recipe);
            }
        }
        if let Some(usage) = &beacon.usage {
            beacon_power += usage * &beacon_config.count;
        }
    }

    clamp_effects(&mut effects);

    // Overclock scales the machine itself, outside the clamped effects
    let mut clock = Rational::one();
    let mut power_factor = Rational::one();
    if let Some(overclock) = &config.overclock {
        clock = overclock / Rational::from(100);
        power_factor = Rational::from_f64(clock.to_f64().powf(OVERCLOCK_POWER_EXPONENT))?;
    }

    let time = time.checked_div(&effects.speed)?.checked_div(&clock)?;

    let adjust_prod = recipe.flags.technology;
    let mut outputs = BTreeMap::new();
    for (item, amount) in &recipe.outputs {
        let amount = if adjust_prod {
            amount.clone()
        } else {
            apply_productivity(amount, recipe.catalyst.get(item), &effects.productivity)
        };
        outputs.insert(item.clone(), amount);
    }

    let mut inputs = recipe.inputs.clone();
    let mut proliferator_inputs = BTreeMap::new();
    if !sprays.is_empty() {
        let sprayed: Rational = recipe
            .inputs
            .iter()
            .filter(|(id, _)| dataset.item(id).map(|i| !i.fluid).unwrap_or(false))
            .map(|(_, amount)| amount)
            .sum();
        for (item, per_item) in sprays {
            let amount = sprayed.checked_div(&per_item)?;
            *inputs.entry(item.clone()).or_default() += &amount;
            *proliferator_inputs.entry(item).or_default() += amount;
        }
    }

    let power = match machine.energy {
        EnergyType::Electric => {
            let usage = machine.usage.clone().unwrap_or_default();
            let drain = machine.drain.clone().unwrap_or_default();
            usage * &effects.consumption * &power_factor + drain + &beacon_power
        }
        EnergyType::Burner | EnergyType::Void => beacon_power,
    };

    let pollution = match (&machine.pollution, machine.energy) {
        (_, EnergyType::Void) | (None, _) => Rational::zero(),
        (Some(base), _) => {
            base / Rational::from(POLLUTION_PER_MINUTE) * &effects.pollution * &effects.consumption
        }
    };

    let mut fuel = None;
    if machine.energy == EnergyType::Burner && !recipe.flags.burner {
        let fuel_id = select_fuel(machine_id, machine, config, settings, dataset)?;
        let fuel_data = dataset.fuel(&fuel_id)?;
        let usage = machine.usage.clone().unwrap_or_default();
        // kW over MJ
        let amount = (&time * &usage * &effects.consumption * &power_factor)
            .checked_div(&(&fuel_data.value * Rational::from(1000)))?;
        if !amount.is_zero() {
            *inputs.entry(fuel_id.clone()).or_default() += &amount;
            if let Some(result) = &fuel_data.result {
                *outputs.entry(result.clone()).or_default() += &amount;
            }
            fuel = Some((fuel_id, amount));
        }
    }

    let cost = config
        .cost
        .clone()
        .or_else(|| recipe.cost.clone())
        .unwrap_or_else(Rational::one);

    Ok(AdjustedRecipe {
        id: recipe.id.clone(),
        machine: machine_id.to_string(),
        time,
        inputs,
        outputs,
        power,
        pollution,
        fuel,
        proliferator_inputs,
        effects,
        adjust_prod,
        cost,
    })
}

/// Rewrite rocket part and launch recipe times so that a launch takes the
/// time to build all its parts plus the launch delay.
pub fn adjust_silo_recipes(
    dataset: &Dataset,
    recipes: &mut [AdjustedRecipe],
) -> Result<(), DatasetError> {
    // Parts shared by several launch recipes start from the same cycle time
    let base_times: Vec<Rational> = recipes.iter().map(|r| r.time.clone()).collect();
    for (launch_idx, recipe) in dataset.recipes.iter().enumerate() {
        let Some(part) = &recipe.part else { continue };

        let part_idx = dataset
            .recipes
            .iter()
            .position(|r| r.flags.rocket_part && r.outputs.contains_key(part));
        let Some(part_idx) = part_idx else { continue };

        let silo = match &dataset.machine(&recipes[part_idx].machine)?.silo {
            Some(silo) => silo.clone(),
            None => continue,
        };
        let per_cycle = match recipes[part_idx].outputs.get(part) {
            Some(amount) if amount.is_positive() => amount.clone(),
            _ => continue,
        };

        let cycles = silo.parts.checked_div(&per_cycle)?;
        let delay = silo.launch.checked_div(&Rational::from(TICKS_PER_SECOND))?;
        let launch_time = &base_times[part_idx] * &cycles + delay;

        recipes[part_idx].time = launch_time.checked_div(&cycles)?;
        recipes[launch_idx].time = launch_time;
    }
    Ok(())
}

fn slowest_transport(settings: &Settings, dataset: &Dataset) -> Option<Rational> {
    let belt = settings.belt(dataset).map(|b| b.speed.clone());
    let pipe = settings.pipe(dataset).map(|p| p.speed.clone());
    match (belt, pipe) {
        (Some(b), Some(p)) => Some(b.min(p)),
        (b, p) => b.or(p),
    }
}

fn module_allowed(module: &ModuleData, recipe: &Recipe, dataset: &Dataset) -> bool {
    match &module.limitation {
        Some(name) => dataset
            .limitations
            .get(name)
            .is_some_and(|recipes| recipes.contains(&recipe.id)),
        None => true,
    }
}

fn apply_module(effects: &mut Effects, module: &ModuleData, factor: &Rational, recipe: &Recipe) {
    for effect in [Effect::Speed, Effect::Productivity, Effect::Consumption, Effect::Pollution] {
        if recipe.disallowed_effects.contains(&effect) {
            continue;
        }
        let Some(delta) = module.effect(effect) else { continue };
        let delta = delta * factor;
        match effect {
            Effect::Speed => effects.speed += delta,
            Effect::Productivity => effects.productivity += delta,
            Effect::Consumption => effects.consumption += delta,
            Effect::Pollution => effects.pollution += delta,
        }
    }
}

fn clamp_effects(effects: &mut Effects) {
    let floor = Rational::fraction(MIN_EFFECT.0, MIN_EFFECT.1);
    for value in [&mut effects.speed, &mut effects.consumption, &mut effects.pollution] {
        if *value < floor {
            *value = floor.clone();
        }
    }
}

/// Productivity only boosts the part of an output above its catalyst amount.
fn apply_productivity(amount: &Rational, catalyst: Option<&Rational>, productivity: &Rational) -> Rational {
    match catalyst {
        Some(catalyst) if catalyst.is_positive() => {
            let base = amount.clone().min(catalyst.clone());
            let boosted = amount - &base;
            base + boosted * productivity
        }
        _ => amount * productivity,
    }
}

/// Item consumed by a proliferator module and how many items one of it sprays.
/// Sprayed proliferator items get their spray count raised by the spraying
/// proliferator's own productivity, rounded down.
fn proliferator_usage(
    module_id: &str,
    module: &ModuleData,
    settings: &Settings,
    dataset: &Dataset,
) -> Result<(String, Rational), DatasetError> {
    let mut sprays = module.sprays.clone().unwrap_or_else(Rational::one);
    if let Some(spray_id) = &settings.proliferator_spray {
        if let Some(bonus) = &dataset.module(spray_id)?.productivity {
            sprays = (sprays * (Rational::one() + bonus)).floor();
        }
    }
    let item = module.proliferator.clone().unwrap_or_else(|| module_id.to_string());
    Ok((item, sprays))
}

fn select_fuel(
    machine_id: &str,
    machine: &MachineData,
    config: &MachineConfig,
    settings: &Settings,
    dataset: &Dataset,
) -> Result<String, DatasetError> {
    if let Some(fuel) = &config.fuel {
        return Ok(fuel.clone());
    }
    let accepts = |category: &str| {
        machine.fuel_categories.is_empty() || machine.fuel_categories.iter().any(|c| c == category)
    };
    if let Some(fuel) = &settings.fuel {
        if accepts(&dataset.fuel(fuel)?.category) {
            return Ok(fuel.clone());
        }
    }
    dataset
        .fuels()
        .find(|(_, data)| accepts(&data.category))
        .map(|(item, _)| item.id.clone())
        .ok_or_else(|| DatasetError::NoFuel(machine_id.to_string()))
}
