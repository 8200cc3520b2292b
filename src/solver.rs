//! Production graph solver
//!
//! Walks the recipe graph from the objectives, builds a linear program with
//! one machine-count column per reachable recipe and one balance row per
//! reachable item, hands it to an [`LpBackend`] and reads the solution back
//! into steps with rates per second.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::adjust::AdjustedDataset;
use crate::lp::{Comparison, Direction, LpBackend, LpProblem, LpStatus};
use crate::models::{
    AdjustedRecipe, Dataset, DatasetError, OBJECTIVE_PARENT, Objective, ObjectiveType, ObjectiveUnit, Step,
};
use crate::rational::{MAX_DENOMINATOR, Rational};
use crate::settings::{MaximizeType, Settings};

/// Solver values closer to zero than this are read as zero.
const ZERO_TOLERANCE: f64 = 1e-9;

/// Relative surplus below which a leftover is rounding noise.
const SURPLUS_TOLERANCE: f64 = 1e-6;

/// Id prefix of steps that only carry a recipe.
pub const RECIPE_STEP_PREFIX: &str = "recipe:";

#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Columns (or maximized targets) that can grow without bound
    Unbounded { targets: Vec<String> },
    Infeasible,
    SolverError { code: i32, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Skipped,
    Paused,
    Solved,
    Failed(Failure),
}

#[derive(Debug, Clone, Default)]
pub struct SolveMetadata {
    pub elapsed: Duration,
    pub backend: String,
    pub status: Option<String>,
    pub return_code: Option<i32>,
    pub variables: usize,
    pub constraints: usize,
    pub objective: Option<f64>,
    /// Reachable items no reachable recipe produces
    pub unproduceable: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Steps with per-second rates and absolute parent/output amounts
    pub steps: Vec<Step>,
    pub result_type: ResultType,
    pub metadata: SolveMetadata,
}

impl SolveResult {
    fn empty(result_type: ResultType) -> Self {
        Self {
            steps: Vec::new(),
            result_type,
            metadata: SolveMetadata::default(),
        }
    }
}

/// Objective targets for one item, in items per second.
#[derive(Debug, Default)]
struct ItemTargets {
    output: Rational,
    input: Rational,
    limit: Option<Rational>,
    maximize: Option<Rational>,
}

/// Objective targets for one recipe, in machines.
#[derive(Debug, Default)]
struct RecipeTargets {
    exact: Option<Rational>,
    lower: Option<Rational>,
    limit: Option<Rational>,
    maximize: Option<Rational>,
}

#[derive(Debug, Default)]
struct Targets {
    items: BTreeMap<usize, ItemTargets>,
    recipes: BTreeMap<usize, RecipeTargets>,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Item(usize),
    Recipe(usize),
}

/// Items and recipes reachable from the objectives, in discovery order.
#[derive(Debug)]
struct Graph {
    items: Vec<usize>,
    recipes: Vec<usize>,
    recipe_seen: Vec<bool>,
    /// Usable recipes producing each item, in dataset order
    producers: Vec<Vec<usize>>,
}

impl Graph {
    fn is_unproduceable(&self, item: usize) -> bool {
        !self.producers[item].iter().any(|&r| self.recipe_seen[r])
    }
}

/// Per-machine rates of one recipe, in items per second.
#[derive(Debug, Default)]
struct RecipeRates {
    produced: Vec<(usize, Rational)>,
    consumed: Vec<(usize, Rational)>,
}

#[derive(Debug, Default)]
struct Columns {
    recipes: BTreeMap<usize, usize>,
    surplus: BTreeMap<usize, usize>,
    input: BTreeMap<usize, usize>,
    maximize: BTreeMap<usize, usize>,
}

/// A constraint row with exact coefficients, mirrored into the float problem.
#[derive(Debug, Clone)]
struct ExactRow {
    coefficients: Vec<(usize, Rational)>,
    op: Comparison,
    rhs: Rational,
}

impl ExactRow {
    fn holds(&self, values: &[Rational]) -> bool {
        let lhs: Rational = self.coefficients.iter().map(|(c, a)| a * &values[*c]).sum();
        match self.op {
            Comparison::Eq => lhs == self.rhs,
            Comparison::Le => lhs <= self.rhs,
            Comparison::Ge => lhs >= self.rhs,
        }
    }

    /// Whether the float solution sits on this row.
    fn is_tight(&self, values: &[f64]) -> bool {
        if self.op == Comparison::Eq {
            return true;
        }
        let lhs: f64 = self.coefficients.iter().map(|(c, a)| a.to_f64() * values[*c]).sum();
        let rhs = self.rhs.to_f64();
        (lhs - rhs).abs() <= SURPLUS_TOLERANCE * rhs.abs().max(1.0)
    }
}

#[derive(Debug)]
struct Model {
    problem: LpProblem,
    rows: Vec<ExactRow>,
    columns: Columns,
}

impl Model {
    fn add_row(&mut self, name: String, coefficients: Vec<(usize, Rational)>, op: Comparison, rhs: Rational) {
        let floats = coefficients.iter().map(|(c, a)| (*c, a.to_f64()));
        self.problem.add_constraint(name, floats, op, rhs.to_f64());
        self.rows.push(ExactRow { coefficients, op, rhs });
    }
}

/// Solve for the machine counts meeting `objectives` at minimum cost.
#[instrument(skip_all, fields(objectives = objectives.len()))]
pub fn solve(
    objectives: &[Objective],
    settings: &Settings,
    adjusted: &AdjustedDataset<'_>,
    backend: &dyn LpBackend,
) -> Result<SolveResult, DatasetError> {
    if settings.paused {
        return Ok(SolveResult::empty(ResultType::Paused));
    }
    if objectives.is_empty() {
        return Ok(SolveResult::empty(ResultType::Skipped));
    }

    let started = Instant::now();
    let dataset = adjusted.dataset;
    let targets = collect_targets(objectives, settings, dataset)?;

    // Walk from the objectives in the order given so steps keep that order
    let roots: Vec<Node> = objectives
        .iter()
        .filter_map(|o| {
            if o.is_recipe() {
                dataset.recipe_idx(&o.target_id).map(Node::Recipe)
            } else {
                dataset.item_idx(&o.target_id).map(Node::Item)
            }
        })
        .collect();
    let graph = walk(&roots, adjusted, settings);

    let rates = graph
        .recipes
        .iter()
        .map(|&r| Ok((r, recipe_rates(&adjusted.recipes[r], dataset)?)))
        .collect::<Result<HashMap<_, _>, DatasetError>>()?;

    let unproduceable: Vec<usize> = graph.items.iter().copied().filter(|&i| graph.is_unproduceable(i)).collect();
    debug!(
        items = graph.items.len(),
        recipes = graph.recipes.len(),
        unproduceable = unproduceable.len(),
        "walked recipe graph"
    );

    // Excluded recipes never run, so a positive machine target on one cannot be met
    let blocked = targets.recipes.iter().find(|(r, t)| {
        !graph.recipe_seen[**r]
            && (t.exact.as_ref().is_some_and(|v| v.is_positive()) || t.lower.as_ref().is_some_and(|v| v.is_positive()))
    });
    if let Some((&r, _)) = blocked {
        warn!(recipe = %adjusted.recipes[r].id, "objective needs an excluded recipe");
        let mut result = SolveResult::empty(ResultType::Failed(Failure::Infeasible));
        result.metadata.backend = backend.name().to_string();
        result.metadata.elapsed = started.elapsed();
        return Ok(result);
    }

    let model = build_problem(&graph, &rates, &targets, settings, adjusted);
    let problem = &model.problem;
    let outcome = backend.submit(problem);

    let mut metadata = SolveMetadata {
        elapsed: Duration::ZERO,
        backend: backend.name().to_string(),
        status: Some(outcome.status.to_string()),
        return_code: Some(outcome.status.code()),
        variables: problem.variables.len(),
        constraints: problem.constraints.len(),
        objective: outcome.objective,
        unproduceable: unproduceable.iter().map(|&i| dataset.items[i].id.clone()).collect(),
    };

    let result_type = match &outcome.status {
        LpStatus::Optimal if outcome.values.len() == problem.variables.len() => ResultType::Solved,
        LpStatus::Optimal => ResultType::Failed(Failure::SolverError {
            code: -1,
            message: format!(
                "expected {} values, got {}",
                problem.variables.len(),
                outcome.values.len()
            ),
        }),
        LpStatus::Infeasible => ResultType::Failed(Failure::Infeasible),
        LpStatus::Unbounded { column } => {
            let targets = match column.and_then(|c| problem.variables.get(c)) {
                Some(var) => vec![var.name.clone()],
                None => objectives
                    .iter()
                    .filter(|o| o.kind == ObjectiveType::Maximize)
                    .map(|o| o.target_id.clone())
                    .collect(),
            };
            ResultType::Failed(Failure::Unbounded { targets })
        }
        LpStatus::Error { code, message } => ResultType::Failed(Failure::SolverError {
            code: *code,
            message: message.clone(),
        }),
    };

    let steps = if result_type == ResultType::Solved {
        let values = exact_values(&model.rows, &outcome.values).unwrap_or_else(|| {
            debug!("tight rows leave the solution open, approximating solver values");
            outcome.values.iter().map(|&v| to_rational(v)).collect()
        });
        parse_solution(&graph, &rates, &targets, &model.columns, &values, adjusted)
    } else {
        warn!(status = %outcome.status, "solver found no solution");
        Vec::new()
    };

    metadata.elapsed = started.elapsed();
    info!(
        steps = steps.len(),
        elapsed_ms = metadata.elapsed.as_millis() as u64,
        status = %outcome.status,
        "solved production graph"
    );

    Ok(SolveResult {
        steps,
        result_type,
        metadata,
    })
}

/// Convert objectives into per-second item targets and machine-count recipe
/// targets. Repeated objectives on the same target accumulate.
fn collect_targets(objectives: &[Objective], settings: &Settings, dataset: &Dataset) -> Result<Targets, DatasetError> {
    let mut targets = Targets::default();

    for objective in objectives {
        if objective.is_recipe() {
            let r = dataset
                .recipe_idx(&objective.target_id)
                .ok_or_else(|| DatasetError::UnknownRecipe(objective.target_id.clone()))?;
            let entry = targets.recipes.entry(r).or_default();
            let value = objective.value.clone();
            match objective.kind {
                ObjectiveType::Output => add_to(&mut entry.exact, value),
                ObjectiveType::Input => add_to(&mut entry.lower, value),
                ObjectiveType::Limit => min_into(&mut entry.limit, value),
                ObjectiveType::Maximize => add_to(&mut entry.maximize, value),
            }
            continue;
        }

        let i = dataset
            .item_idx(&objective.target_id)
            .ok_or_else(|| DatasetError::UnknownItem(objective.target_id.clone()))?;
        let entry = targets.items.entry(i).or_default();
        match objective.kind {
            // Maximize values are weights or ratios, not rates
            ObjectiveType::Maximize => add_to(&mut entry.maximize, objective.value.clone()),
            kind => {
                let rate = item_rate(objective, settings, dataset)?;
                match kind {
                    ObjectiveType::Output => entry.output += rate,
                    ObjectiveType::Input => entry.input += rate,
                    _ => min_into(&mut entry.limit, rate),
                }
            }
        }
    }

    Ok(targets)
}

fn item_rate(objective: &Objective, settings: &Settings, dataset: &Dataset) -> Result<Rational, DatasetError> {
    let item = dataset.item(&objective.target_id)?;
    let display = settings.display_rate.value();
    match objective.unit {
        ObjectiveUnit::Items | ObjectiveUnit::Machines => Ok(&objective.value / &display),
        ObjectiveUnit::Belts => {
            let speed = settings
                .transport_speed(dataset, item)
                .ok_or_else(|| DatasetError::NoTransport(item.id.clone()))?;
            Ok(&objective.value * speed)
        }
        ObjectiveUnit::Wagons => {
            let capacity = settings
                .wagon_capacity(dataset, item)
                .ok_or_else(|| DatasetError::NoWagon(item.id.clone()))?;
            Ok(&objective.value * capacity / display)
        }
    }
}

fn add_to(slot: &mut Option<Rational>, value: Rational) {
    *slot = Some(match slot.take() {
        Some(existing) => existing + value,
        None => value,
    });
}

fn min_into(slot: &mut Option<Rational>, value: Rational) {
    *slot = Some(match slot.take() {
        Some(existing) => existing.min(value),
        None => value,
    });
}

/// Breadth-first walk over the bipartite item/recipe graph. Visited flags
/// are indexed by arena position, so cycles are visited once.
fn walk(roots: &[Node], adjusted: &AdjustedDataset<'_>, settings: &Settings) -> Graph {
    let dataset = adjusted.dataset;
    let mut producers = vec![Vec::new(); dataset.items.len()];
    for (r, recipe) in adjusted.recipes.iter().enumerate() {
        if settings.excluded_recipes.contains(&recipe.id) {
            continue;
        }
        for (item, amount) in &recipe.outputs {
            if !amount.is_positive() {
                continue;
            }
            if let Some(i) = dataset.item_idx(item) {
                producers[i].push(r);
            }
        }
    }

    let mut item_seen = vec![false; dataset.items.len()];
    let mut recipe_seen = vec![false; adjusted.recipes.len()];
    let mut items = Vec::new();
    let mut recipes = Vec::new();
    let mut queue: VecDeque<Node> = roots.iter().copied().collect();

    while let Some(node) = queue.pop_front() {
        match node {
            Node::Item(i) => {
                if std::mem::replace(&mut item_seen[i], true) {
                    continue;
                }
                items.push(i);
                if settings.excluded_items.contains(&dataset.items[i].id) {
                    continue;
                }
                queue.extend(producers[i].iter().filter(|&&r| !recipe_seen[r]).map(|&r| Node::Recipe(r)));
            }
            Node::Recipe(r) => {
                let recipe = &adjusted.recipes[r];
                if recipe_seen[r] || settings.excluded_recipes.contains(&recipe.id) {
                    continue;
                }
                recipe_seen[r] = true;
                recipes.push(r);
                for id in recipe.inputs.keys().chain(recipe.outputs.keys()) {
                    if let Some(i) = dataset.item_idx(id) {
                        if !item_seen[i] {
                            queue.push_back(Node::Item(i));
                        }
                    }
                }
            }
        }
    }

    Graph {
        items,
        recipes,
        recipe_seen,
        producers,
    }
}

fn recipe_rates(recipe: &AdjustedRecipe, dataset: &Dataset) -> Result<RecipeRates, DatasetError> {
    let mut rates = RecipeRates::default();
    for (id, amount) in &recipe.outputs {
        let i = dataset.item_idx(id).ok_or_else(|| DatasetError::UnknownItem(id.clone()))?;
        rates.produced.push((i, amount.checked_div(&recipe.time)?));
    }
    for (id, amount) in &recipe.inputs {
        let i = dataset.item_idx(id).ok_or_else(|| DatasetError::UnknownItem(id.clone()))?;
        let mut rate = amount.checked_div(&recipe.time)?;
        if recipe.adjust_prod {
            rate = rate.checked_div(&recipe.effects.productivity)?;
        }
        rates.consumed.push((i, rate));
    }
    Ok(rates)
}

fn build_problem(
    graph: &Graph,
    rates: &HashMap<usize, RecipeRates>,
    targets: &Targets,
    settings: &Settings,
    adjusted: &AdjustedDataset<'_>,
) -> Model {
    let dataset = adjusted.dataset;
    let costs = &settings.costs;
    let ratio_mode = settings.maximize_type == MaximizeType::Ratio;
    let mut model = Model {
        problem: LpProblem::new(Direction::Minimize),
        rows: Vec::new(),
        columns: Columns::default(),
    };

    for &r in &graph.recipes {
        let recipe = &adjusted.recipes[r];
        let mut cost = &costs.machine * &recipe.cost;
        if !ratio_mode {
            if let Some(weight) = targets.recipes.get(&r).and_then(|t| t.maximize.as_ref()) {
                cost += &costs.maximize * weight;
            }
        }
        let col = model
            .problem
            .add_variable(format!("recipe:{}", recipe.id), cost.to_f64(), 0.0, f64::INFINITY);
        model.columns.recipes.insert(r, col);
    }

    for &i in &graph.items {
        let id = &dataset.items[i].id;
        let col = model
            .problem
            .add_variable(format!("surplus:{id}"), costs.surplus.to_f64(), 0.0, f64::INFINITY);
        model.columns.surplus.insert(i, col);

        let input_cost = if settings.excluded_items.contains(id) {
            Some(&costs.excluded)
        } else if graph.is_unproduceable(i) {
            Some(&costs.unproduceable)
        } else {
            None
        };
        if let Some(cost) = input_cost {
            let col = model
                .problem
                .add_variable(format!("input:{id}"), cost.to_f64(), 0.0, f64::INFINITY);
            model.columns.input.insert(i, col);
        }

        if let Some(weight) = targets.items.get(&i).and_then(|t| t.maximize.as_ref()) {
            let cost = if ratio_mode { 0.0 } else { (&costs.maximize * weight).to_f64() };
            let col = model.problem.add_variable(format!("maximize:{id}"), cost, 0.0, f64::INFINITY);
            model.columns.maximize.insert(i, col);
        }
    }

    let has_maximize =
        !model.columns.maximize.is_empty() || targets.recipes.values().any(|t| t.maximize.is_some());
    let ratio_col = (ratio_mode && has_maximize)
        .then(|| model.problem.add_variable("ratio", costs.maximize.to_f64(), 0.0, f64::INFINITY));

    // Item balance: produced - consumed + input - surplus - maximized = output - provided
    let mut rows: BTreeMap<usize, Vec<(usize, Rational)>> = graph.items.iter().map(|&i| (i, Vec::new())).collect();
    let mut supply: BTreeMap<usize, Vec<(usize, Rational)>> = BTreeMap::new();
    for &r in &graph.recipes {
        let col = model.columns.recipes[&r];
        let recipe_rates = &rates[&r];
        for (i, rate) in &recipe_rates.produced {
            if let Some(row) = rows.get_mut(i) {
                row.push((col, rate.clone()));
            }
            supply.entry(*i).or_default().push((col, rate.clone()));
        }
        for (i, rate) in &recipe_rates.consumed {
            if let Some(row) = rows.get_mut(i) {
                row.push((col, -rate));
            }
        }
    }

    for &i in &graph.items {
        let id = &dataset.items[i].id;
        let input_col = model.columns.input.get(&i).copied();
        let maximize_col = model.columns.maximize.get(&i).copied();

        let mut row = rows.remove(&i).unwrap_or_default();
        row.push((model.columns.surplus[&i], -Rational::one()));
        if let Some(col) = input_col {
            row.push((col, Rational::one()));
        }
        if let Some(col) = maximize_col {
            row.push((col, -Rational::one()));
        }
        let rhs = targets
            .items
            .get(&i)
            .map(|t| &t.output - &t.input)
            .unwrap_or_default();
        model.add_row(format!("balance:{id}"), row, Comparison::Eq, rhs);

        if let Some(limit) = targets.items.get(&i).and_then(|t| t.limit.as_ref()) {
            let mut row = supply.remove(&i).unwrap_or_default();
            if let Some(col) = input_col {
                row.push((col, Rational::one()));
            }
            model.add_row(format!("limit:{id}"), row, Comparison::Le, limit.clone());
        }

        if let (Some(t), Some(col), Some(weight)) = (
            ratio_col,
            maximize_col,
            targets.items.get(&i).and_then(|t| t.maximize.as_ref()),
        ) {
            let row = vec![(col, Rational::one()), (t, -weight)];
            model.add_row(format!("ratio:{id}"), row, Comparison::Eq, Rational::zero());
        }
    }

    for (&r, target) in &targets.recipes {
        let Some(&col) = model.columns.recipes.get(&r) else { continue };
        let id = &adjusted.recipes[r].id;
        let unit = || vec![(col, Rational::one())];
        if let Some(exact) = &target.exact {
            model.add_row(format!("output:{id}"), unit(), Comparison::Eq, exact.clone());
        }
        if let Some(lower) = &target.lower {
            model.add_row(format!("input:{id}"), unit(), Comparison::Ge, lower.clone());
        }
        if let Some(limit) = &target.limit {
            model.add_row(format!("limit:{id}"), unit(), Comparison::Le, limit.clone());
        }
        if let (Some(t), Some(weight)) = (ratio_col, &target.maximize) {
            let row = vec![(col, Rational::one()), (t, -weight)];
            model.add_row(format!("ratio:{id}"), row, Comparison::Eq, Rational::zero());
        }
    }

    model
}

/// Recompute the columns the backend left nonzero by solving the rows the
/// float solution sits on in exact arithmetic. Returns `None` unless those
/// rows pin down one nonnegative solution that satisfies every row.
fn exact_values(rows: &[ExactRow], values: &[f64]) -> Option<Vec<Rational>> {
    let active: Vec<usize> = (0..values.len()).filter(|&c| values[c].abs() > ZERO_TOLERANCE).collect();
    let position: HashMap<usize, usize> = active.iter().enumerate().map(|(k, &c)| (c, k)).collect();
    let width = active.len();

    // Augmented matrix over the active columns
    let mut matrix: Vec<Vec<Rational>> = Vec::new();
    for row in rows.iter().filter(|row| row.is_tight(values)) {
        let mut line = vec![Rational::zero(); width + 1];
        for (c, a) in &row.coefficients {
            if let Some(&k) = position.get(c) {
                line[k] += a;
            }
        }
        line[width] = row.rhs.clone();
        matrix.push(line);
    }

    for col in 0..width {
        let pivot = (col..matrix.len()).find(|&r| !matrix[r][col].is_zero())?;
        matrix.swap(col, pivot);
        let lead = matrix[col][col].clone();
        for v in matrix[col].iter_mut() {
            *v = v.checked_div(&lead).ok()?;
        }
        let pivot_row = matrix[col].clone();
        for (r, line) in matrix.iter_mut().enumerate() {
            if r == col || line[col].is_zero() {
                continue;
            }
            let factor = line[col].clone();
            for (v, p) in line.iter_mut().zip(&pivot_row) {
                *v -= &factor * p;
            }
        }
    }
    if matrix[width..].iter().any(|line| !line[width].is_zero()) {
        return None;
    }

    let mut exact = vec![Rational::zero(); values.len()];
    for (k, &c) in active.iter().enumerate() {
        if matrix[k][width].is_negative() {
            return None;
        }
        exact[c] = matrix[k][width].clone();
    }
    if !rows.iter().all(|row| row.holds(&exact)) {
        return None;
    }
    Some(exact)
}

fn to_rational(value: f64) -> Rational {
    if !value.is_finite() || value.abs() < ZERO_TOLERANCE {
        return Rational::zero();
    }
    Rational::approximate(value, MAX_DENOMINATOR)
        .map(|v| v.max(Rational::zero()))
        .unwrap_or_default()
}

/// Amounts of one item flowing through the solved plan, per second.
#[derive(Debug, Default)]
struct ItemFlow {
    produced: Rational,
    consumed: Rational,
    /// (recipe, amount) in dataset order
    producers: Vec<(usize, Rational)>,
    consumers: Vec<(usize, Rational)>,
}

fn parse_solution(
    graph: &Graph,
    rates: &HashMap<usize, RecipeRates>,
    targets: &Targets,
    columns: &Columns,
    values: &[Rational],
    adjusted: &AdjustedDataset<'_>,
) -> Vec<Step> {
    let dataset = adjusted.dataset;

    let mut machines: BTreeMap<usize, Rational> = BTreeMap::new();
    for (&r, &col) in &columns.recipes {
        if values[col].is_positive() {
            machines.insert(r, values[col].clone());
        }
    }

    // BTreeMap iteration keeps producers in dataset order for tie-breaks
    let mut flows: HashMap<usize, ItemFlow> = HashMap::new();
    for (&r, count) in &machines {
        for (i, rate) in &rates[&r].produced {
            let amount = rate * count;
            let flow = flows.entry(*i).or_default();
            flow.produced += &amount;
            flow.producers.push((r, amount));
        }
        for (i, rate) in &rates[&r].consumed {
            let amount = rate * count;
            let flow = flows.entry(*i).or_default();
            flow.consumed += &amount;
            flow.consumers.push((r, amount));
        }
    }

    let mut steps: Vec<Step> = Vec::new();
    let mut item_steps: HashMap<usize, usize> = HashMap::new();
    for &i in &graph.items {
        let flow = flows.remove(&i).unwrap_or_default();
        let target = targets.items.get(&i);
        let input = columns.input.get(&i).map(|&c| values[c].clone()).unwrap_or_default();
        let provided = target.map(|t| t.input.clone()).unwrap_or_default();
        let output = target.map(|t| t.output.clone()).unwrap_or_default();

        let items = &flow.produced + &input + &provided;
        if !items.is_positive() {
            continue;
        }

        let leftover = &items - &flow.consumed - &output;
        let maximized = match columns.maximize.get(&i) {
            Some(&c) => values[c].clone().min(leftover.clone()).max(Rational::zero()),
            None => Rational::zero(),
        };
        let mut surplus = &leftover - &maximized;
        let noise = SURPLUS_TOLERANCE * items.to_f64().max(1.0);
        if surplus.to_f64() <= noise {
            surplus = Rational::zero();
        }

        let id = dataset.items[i].id.clone();
        let mut step = Step {
            id: id.clone(),
            item_id: Some(id),
            items: Some(items),
            ..Step::default()
        };
        let objective_share = output + maximized;
        if objective_share.is_positive() {
            step.output = Some(objective_share.clone());
            step.parents.insert(OBJECTIVE_PARENT.to_string(), objective_share);
        }
        if surplus.is_positive() {
            step.surplus = Some(surplus);
        }

        item_steps.insert(i, steps.len());
        steps.push(step);
        flows.insert(i, flow);
    }

    // Each item step takes its dominant producer, first in dataset order on ties
    let mut hosts: HashMap<usize, usize> = HashMap::new();
    for &i in &graph.items {
        let (Some(&s), Some(flow)) = (item_steps.get(&i), flows.get(&i)) else { continue };
        let mut best: Option<&(usize, Rational)> = None;
        for candidate in &flow.producers {
            if best.is_none_or(|b| candidate.1 > b.1) {
                best = Some(candidate);
            }
        }
        if let Some(&(r, _)) = best {
            hosts.entry(r).or_insert(s);
        }
    }

    for &r in &graph.recipes {
        if machines.contains_key(&r) && !hosts.contains_key(&r) {
            let id = &adjusted.recipes[r].id;
            hosts.insert(r, steps.len());
            steps.push(Step {
                id: format!("{RECIPE_STEP_PREFIX}{id}"),
                ..Step::default()
            });
        }
    }

    for (&r, &s) in &hosts {
        let recipe = &adjusted.recipes[r];
        let count = &machines[&r];
        let step = &mut steps[s];
        step.recipe_id = Some(recipe.id.clone());
        step.machines = Some(count.clone());
        let power = count * &recipe.power;
        if !power.is_zero() {
            step.power = Some(power);
        }
        let pollution = count * &recipe.pollution;
        if !pollution.is_zero() {
            step.pollution = Some(pollution);
        }
        for (i, rate) in &rates[&r].produced {
            if item_steps.contains_key(i) {
                step.outputs.insert(dataset.items[*i].id.clone(), rate * count);
            }
        }
    }

    for (&i, &s) in &item_steps {
        let Some(flow) = flows.get(&i) else { continue };
        for (r, amount) in &flow.consumers {
            let parent = steps[hosts[r]].id.clone();
            *steps[s].parents.entry(parent).or_default() += amount;
        }
    }

    steps
}
