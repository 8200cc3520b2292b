//! Database schema and operations
//!
//! Rationals are stored as TEXT in their exact string form. Item capability
//! data is stored as a JSON document per item.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::models::{Dataset, Effect, Item, Recipe, RecipeFlags};
use crate::rational::Rational;

impl ToSql for Rational {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Rational {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Rational::from(i)),
            _ => value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e))),
        }
    }
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Items with their capability data (belt, fuel, module, machine, ...)
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            position INTEGER NOT NULL,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT,
            position INTEGER NOT NULL,
            time TEXT NOT NULL,
            cost TEXT,
            mining INTEGER NOT NULL DEFAULT 0,
            technology INTEGER NOT NULL DEFAULT 0,
            burner INTEGER NOT NULL DEFAULT 0,
            rocket_part INTEGER NOT NULL DEFAULT 0,
            part TEXT,
            disallowed TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS recipe_inputs (
            recipe_id TEXT,
            item_id TEXT,
            amount TEXT NOT NULL,
            PRIMARY KEY (recipe_id, item_id)
        );

        CREATE TABLE IF NOT EXISTS recipe_outputs (
            recipe_id TEXT,
            item_id TEXT,
            amount TEXT NOT NULL,
            PRIMARY KEY (recipe_id, item_id)
        );

        CREATE TABLE IF NOT EXISTS recipe_catalysts (
            recipe_id TEXT,
            item_id TEXT,
            amount TEXT NOT NULL,
            PRIMARY KEY (recipe_id, item_id)
        );

        -- Machines able to run a recipe, preferred first
        CREATE TABLE IF NOT EXISTS recipe_producers (
            recipe_id TEXT,
            machine_id TEXT,
            position INTEGER NOT NULL,
            PRIMARY KEY (recipe_id, machine_id)
        );

        -- Named recipe lists that restrict modules (e.g. productivity)
        CREATE TABLE IF NOT EXISTS limitations (
            name TEXT,
            recipe_id TEXT,
            PRIMARY KEY (name, recipe_id)
        );

        CREATE INDEX IF NOT EXISTS idx_recipe_inputs_item ON recipe_inputs(item_id);
        CREATE INDEX IF NOT EXISTS idx_recipe_outputs_item ON recipe_outputs(item_id);
        "#,
    )?;
    Ok(())
}

/// Clear all dataset rows (for re-import)
pub fn clear_dataset(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM limitations;
        DELETE FROM recipe_producers;
        DELETE FROM recipe_catalysts;
        DELETE FROM recipe_outputs;
        DELETE FROM recipe_inputs;
        DELETE FROM recipes;
        DELETE FROM items;
        "#,
    )?;
    Ok(())
}

/// Replace the stored dataset with `dataset` in one transaction
pub fn save_dataset(conn: &mut Connection, dataset: &Dataset) -> Result<()> {
    let tx = conn.transaction()?;
    clear_dataset(&tx)?;

    for (position, item) in dataset.items.iter().enumerate() {
        let data = serde_json::to_string(item)?;
        tx.execute(
            "INSERT INTO items (id, name, category, position, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![item.id, item.name, item.category, position as i64, data],
        )?;
    }

    for (position, recipe) in dataset.recipes.iter().enumerate() {
        insert_recipe(&tx, recipe, position)?;
    }

    for (name, recipes) in &dataset.limitations {
        for recipe in recipes {
            tx.execute(
                "INSERT INTO limitations (name, recipe_id) VALUES (?1, ?2)",
                params![name, recipe],
            )?;
        }
    }

    tx.commit()?;
    debug!(items = dataset.items.len(), recipes = dataset.recipes.len(), "saved dataset");
    Ok(())
}

fn insert_recipe(conn: &Connection, recipe: &Recipe, position: usize) -> Result<()> {
    let disallowed = serde_json::to_string(&recipe.disallowed_effects)?;
    conn.execute(
        "INSERT INTO recipes (id, name, category, position, time, cost, mining, technology, burner, rocket_part, part, disallowed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            recipe.id,
            recipe.name,
            recipe.category,
            position as i64,
            recipe.time,
            recipe.cost,
            recipe.flags.mining,
            recipe.flags.technology,
            recipe.flags.burner,
            recipe.flags.rocket_part,
            recipe.part,
            disallowed,
        ],
    )?;

    for (table, amounts) in [
        ("recipe_inputs", &recipe.inputs),
        ("recipe_outputs", &recipe.outputs),
        ("recipe_catalysts", &recipe.catalyst),
    ] {
        for (item, amount) in amounts {
            conn.execute(
                &format!("INSERT INTO {table} (recipe_id, item_id, amount) VALUES (?1, ?2, ?3)"),
                params![recipe.id, item, amount],
            )?;
        }
    }

    for (position, machine) in recipe.producers.iter().enumerate() {
        conn.execute(
            "INSERT INTO recipe_producers (recipe_id, machine_id, position) VALUES (?1, ?2, ?3)",
            params![recipe.id, machine, position as i64],
        )?;
    }
    Ok(())
}

/// Load the stored dataset, keeping the order it was saved in
pub fn load_dataset(conn: &Connection) -> Result<Dataset> {
    let items = list_items_by(conn, "position")?;

    let mut stmt = conn.prepare(
        "SELECT id, name, category, time, cost, mining, technology, burner, rocket_part, part, disallowed
         FROM recipes ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        let mut recipe = Recipe::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get(3)?);
        recipe.category = row.get::<_, Option<String>>(2)?.unwrap_or_default();
        recipe.cost = row.get(4)?;
        recipe.flags = RecipeFlags {
            mining: row.get(5)?,
            technology: row.get(6)?,
            burner: row.get(7)?,
            rocket_part: row.get(8)?,
        };
        recipe.part = row.get(9)?;
        Ok((recipe, row.get::<_, String>(10)?))
    })?;

    let mut recipes = Vec::new();
    for row in rows {
        let (mut recipe, disallowed) = row?;
        recipe.disallowed_effects = serde_json::from_str::<BTreeSet<Effect>>(&disallowed)
            .with_context(|| format!("Bad disallowed effects for recipe {}", recipe.id))?;
        recipe.inputs = get_amounts(conn, "recipe_inputs", &recipe.id)?;
        recipe.outputs = get_amounts(conn, "recipe_outputs", &recipe.id)?;
        recipe.catalyst = get_amounts(conn, "recipe_catalysts", &recipe.id)?;
        recipe.producers = get_producer_machines(conn, &recipe.id)?;
        recipes.push(recipe);
    }

    let mut limitations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT name, recipe_id FROM limitations")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (name, recipe) = row?;
        limitations.entry(name).or_default().insert(recipe);
    }

    Ok(Dataset::new(items, recipes, limitations))
}

fn get_amounts(conn: &Connection, table: &str, recipe_id: &str) -> Result<BTreeMap<String, Rational>> {
    let mut stmt = conn.prepare(&format!("SELECT item_id, amount FROM {table} WHERE recipe_id = ?1"))?;
    let rows = stmt.query_map([recipe_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Rational>(1)?)))?;

    let mut results = BTreeMap::new();
    for row in rows {
        let (item, amount) = row?;
        results.insert(item, amount);
    }
    Ok(results)
}

fn get_producer_machines(conn: &Connection, recipe_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT machine_id FROM recipe_producers WHERE recipe_id = ?1 ORDER BY position")?;
    let rows = stmt.query_map([recipe_id], |row| row.get(0))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn list_items_by(conn: &Connection, order: &str) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(&format!("SELECT id, data FROM items ORDER BY {order}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut results = Vec::new();
    for row in rows {
        let (id, data) = row?;
        let item: Item = serde_json::from_str(&data).with_context(|| format!("Bad data for item {id}"))?;
        results.push(item);
    }
    Ok(results)
}

/// List all items in the database
pub fn list_items(conn: &Connection) -> Result<Vec<Item>> {
    list_items_by(conn, "name")
}

/// List all recipes as (id, name, time) sorted by name
pub fn list_recipes(conn: &Connection) -> Result<Vec<(String, String, Rational)>> {
    let mut stmt = conn.prepare("SELECT id, name, time FROM recipes ORDER BY name")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Get all recipes that produce a given item, with the amount per cycle
pub fn get_producers(conn: &Connection, item_id: &str) -> Result<Vec<(String, Rational)>> {
    recipes_touching(conn, "recipe_outputs", item_id)
}

/// Get all recipes that consume a given item, with the amount per cycle
pub fn get_consumers(conn: &Connection, item_id: &str) -> Result<Vec<(String, Rational)>> {
    recipes_touching(conn, "recipe_inputs", item_id)
}

fn recipes_touching(conn: &Connection, table: &str, item_id: &str) -> Result<Vec<(String, Rational)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT r.id, t.amount
         FROM recipes r
         JOIN {table} t ON r.id = t.recipe_id
         WHERE t.item_id = ?1
         ORDER BY r.position"
    ))?;
    let rows = stmt.query_map([item_id], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}
