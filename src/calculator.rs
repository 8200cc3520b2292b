//! Production plan calculator
//!
//! Ties the pipeline together: adjust recipes for the current settings,
//! solve the graph, then build display steps.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, instrument};

use crate::adjust::adjust_dataset;
use crate::lp::LpBackend;
use crate::models::{Dataset, DatasetError, OBJECTIVE_PARENT, Objective, Step};
use crate::rational::Rational;
use crate::settings::{DisplayRate, Settings};
use crate::solver::{self, RECIPE_STEP_PREFIX, ResultType, SolveMetadata};
use crate::steps::build_steps;

/// A solved production plan in display units.
#[derive(Debug, Clone)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub result_type: ResultType,
    pub metadata: SolveMetadata,
    pub display_rate: DisplayRate,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Calculate a production plan for the given objectives.
#[instrument(skip_all, fields(objectives = objectives.len(), backend = backend.name()))]
pub fn calculate(
    dataset: &Dataset,
    settings: &Settings,
    objectives: &[Objective],
    backend: &dyn LpBackend,
) -> Result<Plan, DatasetError> {
    let adjusted = adjust_dataset(dataset, settings)?;
    let solved = solver::solve(objectives, settings, &adjusted, backend)?;
    let steps = build_steps(&solved.steps, settings, dataset);

    info!(steps = steps.len(), result = ?solved.result_type, "calculated plan");

    Ok(Plan {
        steps,
        result_type: solved.result_type,
        metadata: solved.metadata,
        display_rate: settings.display_rate,
    })
}

/// Format plan steps as a readable listing
pub fn format_steps(plan: &Plan, dataset: &Dataset, settings: &Settings) -> String {
    let suffix = plan.display_rate.suffix();
    let mut output = String::new();

    for step in &plan.steps {
        let name = step
            .item_id
            .as_deref()
            .and_then(|id| dataset.item(id).ok())
            .map(|item| item.name.clone())
            .unwrap_or_else(|| step.id.trim_start_matches(RECIPE_STEP_PREFIX).to_string());

        match &step.items {
            Some(items) => output.push_str(&format!("{} @ {}{}\n", name, decimal(items), suffix)),
            None => output.push_str(&format!("{} (recipe only)\n", name)),
        }

        if let (Some(recipe), Some(machines)) = (&step.recipe_id, &step.machines) {
            let machine = settings
                .machine_config(recipe)
                .and_then(|c| c.machine.as_deref())
                .or_else(|| dataset.recipe(recipe).ok()?.producers.first().map(String::as_str))
                .unwrap_or("?");
            output.push_str(&format!("  {}x {} via {}\n", decimal(machines), machine, recipe));
        }
        if let Some(power) = &step.power {
            output.push_str(&format!("  power {} kW\n", decimal(power)));
        }
        if let Some(pollution) = &step.pollution {
            output.push_str(&format!("  pollution {}{}\n", decimal(pollution), suffix));
        }
        if let Some(belts) = &step.belts {
            output.push_str(&format!("  belts {}\n", decimal(belts)));
        }
        if let Some(surplus) = &step.surplus {
            output.push_str(&format!("  surplus {}{}\n", decimal(surplus), suffix));
        }
        for (parent, share) in &step.parents {
            let parent = if parent == OBJECTIVE_PARENT { "objective" } else { parent };
            output.push_str(&format!("  {}% to {}\n", percent(share), parent));
        }
    }

    output
}

fn decimal(value: &Rational) -> String {
    value.to_precision(3).to_string()
}

fn percent(share: &Rational) -> String {
    (share * Rational::from(100)).to_precision(1).to_string()
}

/// Totals across a whole plan
#[derive(Debug)]
pub struct PlanSummary {
    pub display_rate: DisplayRate,
    pub total_power: Rational,
    pub total_pollution: Rational,
    /// Machine counts keyed by recipe
    pub machine_counts: Vec<(String, Rational)>,
    /// Items supplied from outside the plan
    pub external_inputs: Vec<(String, Rational)>,
    pub surplus: Vec<(String, Rational)>,
    pub objectives: Vec<(String, Rational)>,
}

/// Generate a summary of a plan
pub fn summarize_plan(plan: &Plan) -> PlanSummary {
    let mut machine_counts: BTreeMap<String, Rational> = BTreeMap::new();
    let mut external_inputs = Vec::new();
    let mut surplus = Vec::new();
    let mut objectives = Vec::new();
    let mut total_power = Rational::zero();
    let mut total_pollution = Rational::zero();

    for step in &plan.steps {
        if let (Some(recipe), Some(machines)) = (&step.recipe_id, &step.machines) {
            *machine_counts.entry(recipe.clone()).or_default() += machines;
        }
        if let Some(power) = &step.power {
            total_power += power;
        }
        if let Some(pollution) = &step.pollution {
            total_pollution += pollution;
        }
        if let Some(item) = &step.item_id {
            if step.recipe_id.is_none() {
                if let Some(items) = &step.items {
                    external_inputs.push((item.clone(), items.clone()));
                }
            }
            if let Some(amount) = &step.surplus {
                surplus.push((item.clone(), amount.clone()));
            }
            if let Some(amount) = &step.output {
                objectives.push((item.clone(), amount.clone()));
            }
        }
    }

    PlanSummary {
        display_rate: plan.display_rate,
        total_power,
        total_pollution,
        machine_counts: machine_counts.into_iter().collect(),
        external_inputs,
        surplus,
        objectives,
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = self.display_rate.suffix();
        writeln!(f, "=== Production Summary ===")?;
        for (item, rate) in &self.objectives {
            writeln!(f, "Target: {} @ {}{}", item, decimal(rate), suffix)?;
        }
        writeln!(f)?;

        writeln!(f, "Machines required:")?;
        for (recipe, count) in &self.machine_counts {
            writeln!(f, "  {}x {}", decimal(count), recipe)?;
        }
        writeln!(f)?;

        writeln!(f, "External inputs:")?;
        for (item, rate) in &self.external_inputs {
            writeln!(f, "  {} @ {}{}", item, decimal(rate), suffix)?;
        }

        if !self.surplus.is_empty() {
            writeln!(f)?;
            writeln!(f, "Surplus:")?;
            for (item, rate) in &self.surplus {
                writeln!(f, "  {} @ {}{}", item, decimal(rate), suffix)?;
            }
        }
        writeln!(f)?;

        writeln!(f, "Power:     {} kW", decimal(&self.total_power))?;
        writeln!(f, "Pollution: {}{}", decimal(&self.total_pollution), suffix)?;

        Ok(())
    }
}
