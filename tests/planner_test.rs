// End-to-end planning tests: adjust, solve, build steps

use std::collections::BTreeMap;

use factory_planner::calculator::{Plan, calculate};
use factory_planner::logging;
use factory_planner::lp::MinilpBackend;
use factory_planner::models::{Dataset, Item, MachineData, OBJECTIVE_PARENT, Objective, Recipe, Step};
use factory_planner::rational::Rational;
use factory_planner::settings::{DisplayRate, MaximizeType, Settings};
use factory_planner::solver::{Failure, RECIPE_STEP_PREFIX, ResultType};

fn n(v: i64) -> Rational {
    Rational::from(v)
}

fn machine(id: &str, speed: Rational) -> Item {
    Item::new(id, id).with_machine(MachineData {
        speed: Some(speed),
        ..MachineData::default()
    })
}

fn per_second() -> Settings {
    Settings {
        display_rate: DisplayRate::Second,
        ..Settings::default()
    }
}

fn objectives(specs: &[&str]) -> Vec<Objective> {
    specs.iter().map(|s| s.parse().unwrap()).collect()
}

fn plan(dataset: &Dataset, settings: &Settings, specs: &[&str]) -> Plan {
    logging::init_test();
    calculate(dataset, settings, &objectives(specs), &MinilpBackend).unwrap()
}

fn step<'a>(plan: &'a Plan, id: &str) -> &'a Step {
    plan.step(id).unwrap_or_else(|| panic!("no step {id} in {:?}", plan.steps))
}

/// a <- 2 b, b <- 1 c, b takes 2 s
fn chain() -> Dataset {
    Dataset::new(
        vec![machine("assembler", n(1)), Item::new("a", "A"), Item::new("b", "B"), Item::new("c", "C")],
        vec![
            Recipe::new("a", "A", n(1)).with_input("b", n(2)).with_output("a", n(1)).with_producer("assembler"),
            Recipe::new("b", "B", n(2)).with_input("c", n(1)).with_output("b", n(1)).with_producer("assembler"),
        ],
        BTreeMap::new(),
    )
}

fn assert_parents_sum_to_one(plan: &Plan) {
    for step in &plan.steps {
        if !step.parents.is_empty() {
            let total: Rational = step.parents.values().sum();
            assert_eq!(total, Rational::one(), "parents of {}", step.id);
        }
    }
}

#[test]
fn test_iron_plate_end_to_end() {
    let dataset = Dataset::new(
        vec![
            machine("furnace", Rational::fraction(1, 2)),
            Item::new("iron-ore", "Iron ore"),
            Item::new("iron-plate", "Iron plate"),
        ],
        vec![
            Recipe::new("iron-plate", "Iron plate", Rational::fraction(16, 5))
                .with_input("iron-ore", n(1))
                .with_output("iron-plate", n(1))
                .with_producer("furnace"),
        ],
        BTreeMap::new(),
    );

    let plan = plan(&dataset, &per_second(), &["output:iron-plate=1"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    assert_eq!(plan.steps.len(), 2);

    let plate = &plan.steps[0];
    assert_eq!(plate.id, "iron-plate");
    assert_eq!(plate.items, Some(n(1)));
    assert_eq!(plate.machines, Some(Rational::fraction(32, 5)));
    assert_eq!(plate.surplus, None);

    let ore = &plan.steps[1];
    assert_eq!(ore.id, "iron-ore");
    assert_eq!(ore.items, Some(n(1)));
    assert_eq!(ore.machines, None);
    assert_eq!(ore.parents["iron-plate"], Rational::one());
    assert_eq!(plan.metadata.unproduceable, vec!["iron-ore".to_string()]);
}

#[test]
fn test_chain_matches_recipe_ratios() {
    let plan = plan(&chain(), &per_second(), &["output:a=10"]);
    assert_eq!(plan.result_type, ResultType::Solved);

    assert_eq!(step(&plan, "a").machines, Some(n(10)));
    assert_eq!(step(&plan, "b").items, Some(n(20)));
    // 10 a/s x 2 b per a x 2 s / 1 b per cycle
    assert_eq!(step(&plan, "b").machines, Some(n(40)));
    assert_eq!(step(&plan, "c").items, Some(n(20)));
    assert_parents_sum_to_one(&plan);
}

#[test]
fn test_display_rate_scales_items_only() {
    let settings = Settings {
        display_rate: DisplayRate::Minute,
        ..Settings::default()
    };
    let plan = plan(&chain(), &settings, &["output:a=600"]);

    assert_eq!(step(&plan, "a").items, Some(n(600)));
    assert_eq!(step(&plan, "a").machines, Some(n(10)));
    assert_eq!(step(&plan, "c").items, Some(n(1200)));
}

#[test]
fn test_limit_below_minimum_is_infeasible() {
    let plan = plan(&chain(), &per_second(), &["output:a=10", "limit:c=5"]);
    assert_eq!(plan.result_type, ResultType::Failed(Failure::Infeasible));
    assert!(plan.steps.is_empty());
}

#[test]
fn test_empty_and_paused() {
    let plan = plan(&chain(), &per_second(), &[]);
    assert_eq!(plan.result_type, ResultType::Skipped);
    assert!(plan.steps.is_empty());

    let paused = Settings {
        paused: true,
        ..per_second()
    };
    let plan = self::plan(&chain(), &paused, &["output:a=10"]);
    assert_eq!(plan.result_type, ResultType::Paused);
    assert!(plan.steps.is_empty());
}

#[test]
fn test_maximize_needs_a_limit() {
    let plan = plan(&chain(), &per_second(), &["maximize:a=1"]);
    match plan.result_type {
        ResultType::Failed(Failure::Unbounded { targets }) => assert!(!targets.is_empty()),
        other => panic!("expected unbounded, got {other:?}"),
    }

    let plan = self::plan(&chain(), &per_second(), &["maximize:a=1", "limit:c=20"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    let a = step(&plan, "a");
    assert_eq!(a.items, Some(n(10)));
    assert_eq!(a.output, Some(n(10)));
    assert_eq!(a.machines, Some(n(10)));
}

#[test]
fn test_input_objective_supplies_items() {
    // 10 of the 20 b/s come from outside
    let plan = plan(&chain(), &per_second(), &["output:a=10", "input:b=10"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    assert_eq!(step(&plan, "b").items, Some(n(20)));
    assert_eq!(step(&plan, "b").machines, Some(n(20)));
    assert_eq!(step(&plan, "c").items, Some(n(10)));
}

#[test]
fn test_machine_objective_targets_a_recipe() {
    let plan = plan(&chain(), &per_second(), &["output:b=4@machines"]);
    assert_eq!(plan.result_type, ResultType::Solved);

    let b = step(&plan, "b");
    assert_eq!(b.machines, Some(n(4)));
    assert_eq!(b.items, Some(n(2)));
    assert_eq!(b.surplus, Some(n(2)));
    assert!(plan.step("a").is_none());
}

#[test]
fn test_cycle_is_attributed_to_each_consumer() {
    // hatch: egg -> chicken; breed: chicken -> chicken + 2 egg
    let dataset = Dataset::new(
        vec![machine("coop", n(1)), Item::new("egg", "Egg"), Item::new("chicken", "Chicken")],
        vec![
            Recipe::new("hatch", "Hatch", n(1))
                .with_input("egg", n(1))
                .with_output("chicken", n(1))
                .with_producer("coop"),
            Recipe::new("breed", "Breed", n(1))
                .with_input("chicken", n(1))
                .with_output("chicken", n(1))
                .with_output("egg", n(2))
                .with_producer("coop"),
        ],
        BTreeMap::new(),
    );

    let plan = plan(&dataset, &per_second(), &["output:chicken=1"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    assert!(plan.metadata.unproduceable.is_empty());

    let chicken = step(&plan, "chicken");
    assert_eq!(chicken.recipe_id.as_deref(), Some("hatch"));
    assert_eq!(chicken.machines, Some(n(1)));
    assert_eq!(chicken.items, Some(Rational::fraction(3, 2)));
    assert_eq!(chicken.parents[OBJECTIVE_PARENT], Rational::fraction(2, 3));
    assert_eq!(chicken.parents["egg"], Rational::fraction(1, 3));

    let egg = step(&plan, "egg");
    assert_eq!(egg.recipe_id.as_deref(), Some("breed"));
    assert_eq!(egg.machines, Some(Rational::fraction(1, 2)));
    assert_eq!(egg.parents["chicken"], Rational::one());
    assert_parents_sum_to_one(&plan);
}

#[test]
fn test_ties_go_to_the_first_recipe() {
    // Two identical recipes for the same item, the second one pinned to one machine
    let dataset = Dataset::new(
        vec![machine("assembler", n(1)), Item::new("ore", "Ore"), Item::new("plate", "Plate")],
        vec![
            Recipe::new("plate-a", "Plate A", n(1))
                .with_input("ore", n(1))
                .with_output("plate", n(1))
                .with_producer("assembler"),
            Recipe::new("plate-b", "Plate B", n(1))
                .with_input("ore", n(1))
                .with_output("plate", n(1))
                .with_producer("assembler"),
        ],
        BTreeMap::new(),
    );

    let plan = plan(&dataset, &per_second(), &["output:plate=2", "output:plate-b=1@machines"]);
    assert_eq!(plan.result_type, ResultType::Solved);

    // plate-a and plate-b each make 1/s; plate-a comes first
    let plate = step(&plan, "plate");
    assert_eq!(plate.recipe_id.as_deref(), Some("plate-a"));
    let other = step(&plan, &format!("{RECIPE_STEP_PREFIX}plate-b"));
    assert_eq!(other.machines, Some(n(1)));
    assert_eq!(plate.outputs["plate"], Rational::fraction(1, 2));
    assert_eq!(other.outputs["plate"], Rational::fraction(1, 2));
}

#[test]
fn test_excluded_items_become_inputs() {
    let mut settings = per_second();
    settings.excluded_items.insert("b".into());
    let plan = plan(&chain(), &settings, &["output:a=10"]);

    assert_eq!(plan.result_type, ResultType::Solved);
    let b = step(&plan, "b");
    assert_eq!(b.items, Some(n(20)));
    assert_eq!(b.machines, None);
    assert!(plan.step("c").is_none());
}

#[test]
fn test_maximize_weights_and_ratios() {
    let dataset = Dataset::new(
        vec![machine("assembler", n(1)), Item::new("r", "R"), Item::new("p", "P"), Item::new("q", "Q")],
        vec![
            Recipe::new("p", "P", n(1)).with_input("r", n(1)).with_output("p", n(1)).with_producer("assembler"),
            Recipe::new("q", "Q", n(1)).with_input("r", n(1)).with_output("q", n(1)).with_producer("assembler"),
        ],
        BTreeMap::new(),
    );
    let specs = ["maximize:p=1", "maximize:q=2", "limit:r=30"];

    let weighted = plan(&dataset, &per_second(), &specs);
    assert_eq!(weighted.result_type, ResultType::Solved);
    assert_eq!(step(&weighted, "q").items, Some(n(30)));
    assert!(weighted.step("p").is_none());

    let settings = Settings {
        maximize_type: MaximizeType::Ratio,
        ..per_second()
    };
    let ratio = plan(&dataset, &settings, &specs);
    assert_eq!(ratio.result_type, ResultType::Solved);
    assert_eq!(step(&ratio, "p").items, Some(n(10)));
    assert_eq!(step(&ratio, "q").items, Some(n(20)));
}

#[test]
fn test_large_batches_keep_exact_ratios() {
    let dataset = Dataset::new(
        vec![machine("press", n(1)), Item::new("a", "A")],
        vec![Recipe::new("a", "A", n(1)).with_output("a", n(100_003)).with_producer("press")],
        BTreeMap::new(),
    );

    let plan = plan(&dataset, &per_second(), &["output:a=1"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    let a = step(&plan, "a");
    assert_eq!(a.items, Some(n(1)));
    assert_eq!(a.machines, Some(Rational::fraction(1, 100_003)));
    assert_eq!(a.surplus, None);
}

#[test]
fn test_excluded_recipe_cannot_meet_a_machine_objective() {
    let mut settings = per_second();
    settings.excluded_recipes.insert("b".into());

    let plan = plan(&chain(), &settings, &["output:b=4@machines"]);
    assert_eq!(plan.result_type, ResultType::Failed(Failure::Infeasible));
    assert!(plan.steps.is_empty());

    // Capping an excluded recipe is already satisfied
    let plan = self::plan(&chain(), &settings, &["output:a=1", "input:b=2", "limit:b=0@machines"]);
    assert_eq!(plan.result_type, ResultType::Solved);
    assert!(plan.step("b").unwrap().recipe_id.is_none());
}

#[test]
fn test_unknown_target_is_an_error() {
    let err = calculate(&chain(), &per_second(), &objectives(&["output:z=1"]), &MinilpBackend).unwrap_err();
    assert_eq!(err.to_string(), "unknown item 'z'");
}
