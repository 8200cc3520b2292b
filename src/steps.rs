//! Step tree builder
//!
//! Turns the solver's per-second steps into display steps: rates scaled to
//! the display rate, belt and wagon counts filled in, and parent/output
//! amounts replaced by shares of the finished totals.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::models::{Dataset, Step};
use crate::rational::Rational;
use crate::settings::Settings;

/// Build display steps from solver steps.
///
/// Shares are computed from the per-second totals before scaling, so every
/// step with parents has parent fractions summing to exactly one.
pub fn build_steps(raw: &[Step], settings: &Settings, dataset: &Dataset) -> Vec<Step> {
    let totals: HashMap<&str, &Rational> = raw
        .iter()
        .filter_map(|s| Some((s.item_id.as_deref()?, s.items.as_ref()?)))
        .collect();

    let display = settings.display_rate.value();
    let steps: Vec<Step> = raw
        .iter()
        .map(|step| {
            let mut out = step.clone();

            if let (Some(id), Some(items)) = (&step.item_id, &step.items) {
                if let Ok(item) = dataset.item(id) {
                    out.belts = settings
                        .transport_speed(dataset, item)
                        .and_then(|speed| items.checked_div(&speed).ok());
                    out.wagons = settings
                        .wagon_capacity(dataset, item)
                        .and_then(|capacity| (items * &display).checked_div(&capacity).ok());
                }
            }

            out.items = step.items.as_ref().map(|v| v * &display);
            out.output = step.output.as_ref().map(|v| v * &display);
            out.surplus = step.surplus.as_ref().map(|v| v * &display);
            out.pollution = step.pollution.as_ref().map(|v| v * &display);

            out.parents = shares_of_sum(&step.parents);
            out.outputs = step
                .outputs
                .iter()
                .filter_map(|(item, amount)| {
                    let total = totals.get(item.as_str()).filter(|t| t.is_positive())?;
                    Some((item.clone(), amount / *total))
                })
                .collect();
            out
        })
        .collect();

    debug!(steps = steps.len(), rate = ?settings.display_rate, "built display steps");
    steps
}

fn shares_of_sum(amounts: &BTreeMap<String, Rational>) -> BTreeMap<String, Rational> {
    let sum: Rational = amounts.values().sum();
    if !sum.is_positive() {
        return BTreeMap::new();
    }
    amounts.iter().map(|(k, v)| (k.clone(), v / &sum)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, OBJECTIVE_PARENT};
    use crate::settings::DisplayRate;

    fn n(v: i64) -> Rational {
        Rational::from(v)
    }

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Item::new("gear", "Gear").with_stack(n(100)),
                Item::new("plate", "Plate").with_stack(n(100)),
                Item::new("belt", "Belt").with_belt(n(15)),
                Item::new("wagon", "Wagon").with_cargo_wagon(n(40)),
            ],
            Vec::new(),
            BTreeMap::new(),
        )
    }

    fn raw_steps() -> Vec<Step> {
        let mut gear = Step {
            id: "gear".into(),
            item_id: Some("gear".into()),
            recipe_id: Some("gear".into()),
            items: Some(n(1)),
            output: Some(n(1)),
            machines: Some(n(2)),
            power: Some(n(300)),
            ..Step::default()
        };
        gear.parents.insert(OBJECTIVE_PARENT.into(), n(1));
        gear.outputs.insert("gear".into(), n(1));

        let mut plate = Step {
            id: "plate".into(),
            item_id: Some("plate".into()),
            recipe_id: Some("plate".into()),
            items: Some(n(3)),
            surplus: Some(n(1)),
            machines: Some(Rational::fraction(32, 5)),
            pollution: Some(Rational::fraction(1, 30)),
            ..Step::default()
        };
        plate.parents.insert("gear".into(), n(2));
        plate.outputs.insert("plate".into(), n(3));
        vec![gear, plate]
    }

    #[test]
    fn scales_rates_but_not_machines() {
        let settings = Settings {
            display_rate: DisplayRate::Minute,
            ..Settings::default()
        };
        let steps = build_steps(&raw_steps(), &settings, &dataset());

        let plate = &steps[1];
        assert_eq!(plate.items, Some(n(180)));
        assert_eq!(plate.surplus, Some(n(60)));
        assert_eq!(plate.pollution, Some(n(2)));
        assert_eq!(plate.machines, Some(Rational::fraction(32, 5)));
        assert_eq!(steps[0].power, Some(n(300)));
        assert_eq!(steps[0].output, Some(n(60)));
    }

    #[test]
    fn belts_and_wagons_use_per_second_rates() {
        let settings = Settings {
            display_rate: DisplayRate::Hour,
            ..Settings::default()
        };
        let steps = build_steps(&raw_steps(), &settings, &dataset());

        assert_eq!(steps[1].belts, Some(Rational::fraction(1, 5)));
        // 3/s for an hour over 40 stacks of 100
        assert_eq!(steps[1].wagons, Some(Rational::fraction(27, 10)));
    }

    #[test]
    fn parents_sum_to_one() {
        let mut raw = raw_steps();
        raw[1].parents.insert(OBJECTIVE_PARENT.into(), n(1));
        raw[1].parents.insert("circuit".into(), Rational::fraction(1, 3));
        let steps = build_steps(&raw, &Settings::default(), &dataset());

        let parents = &steps[1].parents;
        let total: Rational = parents.values().sum();
        assert_eq!(total, Rational::one());
        assert_eq!(parents["gear"], Rational::fraction(3, 5));
        assert_eq!(parents["circuit"], Rational::fraction(1, 10));
        assert_eq!(steps[1].outputs["plate"], Rational::one());
    }

    #[test]
    fn missing_transport_leaves_belts_empty() {
        let data = Dataset::new(vec![Item::new("gear", "Gear")], Vec::new(), BTreeMap::new());
        let steps = build_steps(&raw_steps()[..1], &Settings::default(), &data);
        assert_eq!(steps[0].belts, None);
        assert_eq!(steps[0].wagons, None);
    }

    #[test]
    fn zero_capacity_transport_leaves_counts_empty() {
        let data = Dataset::new(
            vec![
                Item::new("gear", "Gear").with_stack(n(0)),
                Item::new("belt", "Belt").with_belt(n(0)),
                Item::new("wagon", "Wagon").with_cargo_wagon(n(40)),
            ],
            Vec::new(),
            BTreeMap::new(),
        );
        let steps = build_steps(&raw_steps()[..1], &Settings::default(), &data);
        assert_eq!(steps[0].belts, None);
        assert_eq!(steps[0].wagons, None);
        assert_eq!(steps[0].items, Some(n(60)));
    }
}
