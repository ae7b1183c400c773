//! `udon run`: Load a program into a behaviour and dispatch events.

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::rc::Rc;
use udon_bytecode::{Program, TypeTag, Value};
use udon_core::{
    BehaviourState, HostObjects, PublicVariableTable, RuntimeOptions, UdonBehaviour, UdonRuntime,
};

/// Event dispatched when none is given
pub const DEFAULT_EVENT: &str = "_start";

pub struct RunArgs {
    pub file: PathBuf,
    pub events: Vec<String>,
    pub assignments: Vec<(String, String)>,
    pub json: bool,
    pub options: RuntimeOptions,
}

/// Parse a `name=value` pair
pub fn parse_assignment(text: &str) -> Result<(String, String), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {text:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in {text:?}"));
    }
    Ok((name.to_string(), value.to_string()))
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let program = Rc::new(super::load_program(&args.file)?);
    let public_variables = public_variables(&program, &args.assignments)?;

    let runtime = UdonRuntime::new(args.options);
    let behaviour = UdonBehaviour::new(&runtime, HostObjects::new(1, 1), Some(Rc::clone(&program)));
    behaviour.set_public_variables(public_variables);
    behaviour
        .initialize()
        .with_context(|| format!("Failed to initialize {}", program.name))?;

    let events = if args.events.is_empty() {
        vec![DEFAULT_EVENT.to_string()]
    } else {
        args.events
    };
    for event in &events {
        behaviour.dispatch(event);
        if behaviour.state() == BehaviourState::Faulted {
            bail!("{} faulted while handling {}", program.name, event);
        }
    }

    let variables: Vec<(&str, Value)> = program
        .symbol_table
        .exported()
        .filter_map(|symbol| {
            behaviour
                .get_variable(&symbol.name)
                .map(|value| (symbol.name.as_str(), value))
        })
        .collect();

    if args.json {
        let object: serde_json::Map<String, serde_json::Value> = variables
            .iter()
            .map(|(name, value)| (name.to_string(), to_json(value)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&object)?);
    } else {
        for (name, value) in &variables {
            println!("{name} = {value}");
        }
    }

    runtime.shutdown();
    Ok(())
}

fn public_variables(
    program: &Program,
    assignments: &[(String, String)],
) -> anyhow::Result<PublicVariableTable> {
    let mut table = PublicVariableTable::new();
    for (name, text) in assignments {
        let symbol = program
            .symbol_table
            .get(name)
            .ok_or_else(|| anyhow!("{} has no variable {}", program.name, name))?;
        if !symbol.exported {
            bail!("variable {} is not exported", name);
        }
        let value = parse_value(symbol.type_tag, text)
            .ok_or_else(|| anyhow!("invalid {} value for {}: {}", symbol.type_tag, name, text))?;
        table.insert(name.clone(), symbol.type_tag, value);
    }
    Ok(table)
}

fn parse_value(type_tag: TypeTag, text: &str) -> Option<Value> {
    match type_tag {
        TypeTag::String if !text.trim_start().starts_with('"') => {
            Some(Value::String(text.to_string()))
        }
        _ => Value::parse_literal(type_tag, text),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => (*b).into(),
        Value::Int32(i) => (*i).into(),
        Value::Int64(i) => (*i).into(),
        Value::UInt32(u) => (*u).into(),
        Value::Single(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => s.clone().into(),
        Value::Object(object) => object.to_string().into(),
    }
}
