// Planning against the built-in sample dataset, directly and through SQLite

use rusqlite::Connection;

use factory_planner::adjust::adjust_dataset;
use factory_planner::calculator::{calculate, format_steps, summarize_plan};
use factory_planner::db;
use factory_planner::lp::MinilpBackend;
use factory_planner::models::Objective;
use factory_planner::rational::Rational;
use factory_planner::sample::sample_dataset;
use factory_planner::settings::{MachineConfig, Settings};
use factory_planner::solver::ResultType;

fn objectives(specs: &[&str]) -> Vec<Objective> {
    specs.iter().map(|s| s.parse().unwrap()).collect()
}

#[test]
fn test_circuits_burn_coal_in_furnaces() {
    let dataset = sample_dataset();
    let settings = Settings::default();

    let adjusted = adjust_dataset(&dataset, &settings).unwrap();
    let plate = adjusted.recipe("iron-plate").unwrap();
    assert_eq!(plate.fuel, Some(("coal".to_string(), Rational::fraction(9, 125))));

    let plan = calculate(&dataset, &settings, &objectives(&["output:electronic-circuit=60"]), &MinilpBackend).unwrap();
    assert_eq!(plan.result_type, ResultType::Solved);

    let circuit = plan.step("electronic-circuit").unwrap();
    assert_eq!(circuit.items, Some(Rational::from(60)));
    // 0.5 s at speed 0.75 for 1 circuit/s
    assert_eq!(circuit.machines, Some(Rational::fraction(2, 3)));

    let coal = plan.step("coal").unwrap();
    assert_eq!(coal.recipe_id.as_deref(), Some("coal"));
    assert!(coal.items.as_ref().unwrap().is_positive());

    for step in &plan.steps {
        if !step.parents.is_empty() {
            let total: Rational = step.parents.values().sum();
            assert_eq!(total, Rational::one(), "parents of {}", step.id);
        }
    }

    let summary = summarize_plan(&plan);
    assert!(summary.total_power.is_positive());
    assert!(summary.total_pollution.is_positive());
    assert!(summary.external_inputs.is_empty());
    assert!(format_steps(&plan, &dataset, &settings).contains("Electronic circuit @ 60/m"));
}

#[test]
fn test_modules_reduce_machine_count() {
    let dataset = sample_dataset();
    let specs = objectives(&["output:iron-gear-wheel=90"]);

    let plain = calculate(&dataset, &Settings::default(), &specs, &MinilpBackend).unwrap();

    let mut settings = Settings::default();
    settings.machines.insert(
        "iron-gear-wheel".into(),
        MachineConfig::for_machine("assembling-machine-2").with_modules(["speed-module", "speed-module"]),
    );
    let fast = calculate(&dataset, &settings, &specs, &MinilpBackend).unwrap();

    let before = plain.step("iron-gear-wheel").unwrap().machines.clone().unwrap();
    let after = fast.step("iron-gear-wheel").unwrap().machines.clone().unwrap();
    // 1.5/s at 0.5 s / 0.75 speed, then 1.4x speed
    assert_eq!(before, Rational::one());
    assert_eq!(after, Rational::fraction(5, 7));
}

#[test]
fn test_rocket_launch_plan() {
    let dataset = sample_dataset();
    let plan = calculate(
        &dataset,
        &Settings::default(),
        &objectives(&["output:space-science-pack=1000"]),
        &MinilpBackend,
    )
    .unwrap();
    assert_eq!(plan.result_type, ResultType::Solved);
    assert!(plan.step("rocket-part").unwrap().machines.as_ref().unwrap().is_positive());
    assert!(plan.step("space-science-pack").is_some());
}

#[test]
fn test_stored_sample_plans_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planner.db");
    let dataset = sample_dataset();

    {
        let mut conn = Connection::open(&path).unwrap();
        db::init_schema(&conn).unwrap();
        db::save_dataset(&mut conn, &dataset).unwrap();
    }

    let conn = Connection::open(&path).unwrap();
    let loaded = db::load_dataset(&conn).unwrap();
    assert_eq!(loaded.validate(), Ok(()));
    assert_eq!(loaded.items.len(), dataset.items.len());

    let specs = objectives(&["output:electronic-circuit=60", "output:iron-gear-wheel=30"]);
    let expected = calculate(&dataset, &Settings::default(), &specs, &MinilpBackend).unwrap();
    let actual = calculate(&loaded, &Settings::default(), &specs, &MinilpBackend).unwrap();
    assert_eq!(actual.steps, expected.steps);
}
