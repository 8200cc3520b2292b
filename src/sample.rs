//! Built-in sample dataset for trying the planner without a data import
//!
//! A small smelting and electronics chain up to a rocket launch.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    BeaconData, Dataset, EnergyType, FuelData, Item, MachineData, ModuleData, Recipe, RecipeFlags, SiloData,
};
use crate::rational::Rational;

fn n(v: i64) -> Rational {
    Rational::from(v)
}

fn f(p: i64, q: i64) -> Rational {
    Rational::fraction(p, q)
}

fn items() -> Vec<Item> {
    vec![
        // Resources
        Item::new("iron-ore", "Iron ore").with_category("resources").with_stack(n(50)),
        Item::new("copper-ore", "Copper ore").with_category("resources").with_stack(n(50)),
        Item::new("coal", "Coal")
            .with_category("resources")
            .with_stack(n(50))
            .with_fuel(FuelData {
                category: "chemical".into(),
                value: n(4),
                result: None,
            }),
        Item::new("water", "Water").with_category("resources").as_fluid(),
        // Intermediates
        Item::new("iron-plate", "Iron plate").with_category("intermediates").with_stack(n(100)),
        Item::new("copper-plate", "Copper plate").with_category("intermediates").with_stack(n(100)),
        Item::new("iron-gear-wheel", "Iron gear wheel").with_category("intermediates").with_stack(n(100)),
        Item::new("copper-cable", "Copper cable").with_category("intermediates").with_stack(n(200)),
        Item::new("electronic-circuit", "Electronic circuit").with_category("intermediates").with_stack(n(200)),
        Item::new("rocket-part", "Rocket part").with_category("intermediates"),
        Item::new("space-science-pack", "Space science pack").with_category("science").with_stack(n(2000)),
        // Machines
        Item::new("electric-mining-drill", "Electric mining drill")
            .with_category("production")
            .with_machine(MachineData {
                speed: Some(f(1, 2)),
                modules: Some(3),
                usage: Some(n(90)),
                pollution: Some(n(10)),
                ..MachineData::default()
            }),
        Item::new("offshore-pump", "Offshore pump").with_category("production").with_machine(MachineData {
            energy: EnergyType::Void,
            ..MachineData::default()
        }),
        Item::new("stone-furnace", "Stone furnace").with_category("production").with_machine(MachineData {
            speed: Some(n(1)),
            energy: EnergyType::Burner,
            fuel_categories: vec!["chemical".into()],
            usage: Some(n(90)),
            pollution: Some(n(2)),
            ..MachineData::default()
        }),
        Item::new("assembling-machine-2", "Assembling machine 2")
            .with_category("production")
            .with_machine(MachineData {
                speed: Some(f(3, 4)),
                modules: Some(2),
                usage: Some(n(150)),
                drain: Some(n(5)),
                pollution: Some(n(3)),
                ..MachineData::default()
            }),
        Item::new("rocket-silo", "Rocket silo").with_category("production").with_machine(MachineData {
            speed: Some(n(1)),
            modules: Some(4),
            usage: Some(n(4000)),
            silo: Some(SiloData {
                parts: n(100),
                launch: n(2430),
            }),
            ..MachineData::default()
        }),
        // Modules and beacons
        Item::new("speed-module", "Speed module").with_category("modules").with_module(ModuleData {
            speed: Some(f(1, 5)),
            consumption: Some(f(1, 2)),
            ..ModuleData::default()
        }),
        Item::new("productivity-module", "Productivity module")
            .with_category("modules")
            .with_module(ModuleData {
                speed: Some(f(-1, 20)),
                productivity: Some(f(1, 25)),
                consumption: Some(f(2, 5)),
                pollution: Some(f(1, 20)),
                limitation: Some("intermediates".into()),
                ..ModuleData::default()
            }),
        Item::new("efficiency-module", "Efficiency module").with_category("modules").with_module(ModuleData {
            consumption: Some(f(-3, 10)),
            ..ModuleData::default()
        }),
        Item::new("beacon", "Beacon").with_category("modules").with_beacon(BeaconData {
            effectivity: f(1, 2),
            modules: 2,
            usage: Some(n(480)),
        }),
        // Logistics
        Item::new("transport-belt", "Transport belt").with_category("logistics").with_belt(n(15)),
        Item::new("pipe", "Pipe").with_category("logistics").with_pipe(n(1200)),
        Item::new("cargo-wagon", "Cargo wagon").with_category("logistics").with_cargo_wagon(n(40)),
        Item::new("fluid-wagon", "Fluid wagon").with_category("logistics").with_fluid_wagon(n(25_000)),
    ]
}

fn mining(id: &str, name: &str) -> Recipe {
    Recipe::new(id, name, n(1))
        .with_category("resources")
        .with_output(id, n(1))
        .with_producer("electric-mining-drill")
        .with_flags(RecipeFlags {
            mining: true,
            ..RecipeFlags::default()
        })
}

fn recipes() -> Vec<Recipe> {
    vec![
        mining("iron-ore", "Iron ore"),
        mining("copper-ore", "Copper ore"),
        mining("coal", "Coal"),
        Recipe::new("water", "Water", n(1))
            .with_category("resources")
            .with_output("water", n(1200))
            .with_producer("offshore-pump"),
        Recipe::new("iron-plate", "Iron plate", f(16, 5))
            .with_category("intermediates")
            .with_input("iron-ore", n(1))
            .with_output("iron-plate", n(1))
            .with_producer("stone-furnace"),
        Recipe::new("copper-plate", "Copper plate", f(16, 5))
            .with_category("intermediates")
            .with_input("copper-ore", n(1))
            .with_output("copper-plate", n(1))
            .with_producer("stone-furnace"),
        Recipe::new("iron-gear-wheel", "Iron gear wheel", f(1, 2))
            .with_category("intermediates")
            .with_input("iron-plate", n(2))
            .with_output("iron-gear-wheel", n(1))
            .with_producer("assembling-machine-2"),
        Recipe::new("copper-cable", "Copper cable", f(1, 2))
            .with_category("intermediates")
            .with_input("copper-plate", n(1))
            .with_output("copper-cable", n(2))
            .with_producer("assembling-machine-2"),
        Recipe::new("electronic-circuit", "Electronic circuit", f(1, 2))
            .with_category("intermediates")
            .with_input("iron-plate", n(1))
            .with_input("copper-cable", n(3))
            .with_output("electronic-circuit", n(1))
            .with_producer("assembling-machine-2"),
        Recipe::new("rocket-part", "Rocket part", n(3))
            .with_category("intermediates")
            .with_input("electronic-circuit", n(10))
            .with_input("iron-gear-wheel", n(10))
            .with_output("rocket-part", n(1))
            .with_producer("rocket-silo")
            .with_flags(RecipeFlags {
                rocket_part: true,
                ..RecipeFlags::default()
            }),
        Recipe::new("space-science-pack", "Space science pack", n(1))
            .with_category("science")
            .with_input("rocket-part", n(100))
            .with_output("space-science-pack", n(1000))
            .with_producer("rocket-silo")
            .with_part("rocket-part"),
    ]
}

/// The sample dataset
pub fn sample_dataset() -> Dataset {
    let productivity: BTreeSet<String> = [
        "iron-plate",
        "copper-plate",
        "iron-gear-wheel",
        "copper-cable",
        "electronic-circuit",
        "rocket-part",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let mut limitations = BTreeMap::new();
    limitations.insert("intermediates".to_string(), productivity);

    Dataset::new(items(), recipes(), limitations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_consistent() {
        let dataset = sample_dataset();
        assert_eq!(dataset.validate(), Ok(()));
        assert!(dataset.machine("rocket-silo").unwrap().silo.is_some());
        assert_eq!(dataset.belts().count(), 1);
        assert_eq!(dataset.fuels().map(|(item, _)| item.id.as_str()).collect::<Vec<_>>(), vec!["coal"]);
    }
}
