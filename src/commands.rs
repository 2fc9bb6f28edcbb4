fn load(path: &std::path::Path) -> Result<Vec<crate::schema::ResolvedSchema>, LoadError> {
    let map = crate::register_map::RegisterMap::load(path)?;
    tracing::debug!(
        message = "scanned register map",
        registers = map.registers.len(),
        custom_types = map.types.len()
    );
    Ok(crate::schema::resolve(&map)?)
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("could not scan the register map")]
    Scan(#[from] crate::register_map::ScanError),
    #[error("could not resolve the register map")]
    Resolve(#[from] crate::schema::ResolveError),
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub mod registers {
    use std::path::PathBuf;

    use crate::output;
    use crate::schema::ResolvedSchema;

    /// List the registers described by a register map export.
    #[derive(clap::Parser)]
    pub struct Args {
        /// The register map exported by GenConfig.
        map: PathBuf,
        /// Only list registers whose number, name, group or type contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the register map at {1:?}")]
        Load(#[source] super::LoadError, PathBuf),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct Record<'a> {
        #[serde(flatten)]
        schema: &'a ResolvedSchema,
        min_scaled: Option<f64>,
        max_scaled: Option<f64>,
        custom_type: Option<&'a str>,
    }

    fn is_match(schema: &ResolvedSchema, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        schema.register.to_string().contains(&pattern)
            || schema.name.to_lowercase().contains(&pattern)
            || schema.group.to_lowercase().contains(&pattern)
            || schema.datatype.contains(&pattern)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let schema = super::load(&args.map).map_err(|e| Error::Load(e, args.map.clone()))?;
        let mut output = args.output.open(&[
            "Register", "Comm. obj", "Group", "Name", "Units", "Type", "Points", "Min", "Max",
        ])?;
        for entry in &schema {
            if let Some(pattern) = &args.filter {
                if !is_match(entry, pattern) {
                    continue;
                }
            }
            output.record(
                || {
                    vec![
                        entry.register.to_string(),
                        entry.comm_obj.to_string(),
                        entry.group.clone(),
                        entry.name.clone(),
                        entry.units.clone(),
                        entry.datatype.clone(),
                        entry.points.to_string(),
                        super::optional(entry.min_scaled()),
                        super::optional(entry.max_scaled()),
                    ]
                },
                || Record {
                    schema: entry,
                    min_scaled: entry.min_scaled(),
                    max_scaled: entry.max_scaled(),
                    custom_type: entry.custom_type.as_ref().map(|t| t.name.as_str()),
                },
            )?;
        }
        Ok(output.commit()?)
    }
}

pub mod read {
    use std::path::PathBuf;

    use crate::connection::{self, Connection};
    use crate::output;
    use crate::poll::{Poller, Reading};
    use crate::registers::{Validation, Value};

    /// Read registers from the controller and decode them according to a register map export.
    #[derive(clap::Parser)]
    pub struct Args {
        /// The register map exported by GenConfig.
        map: PathBuf,
        #[clap(flatten)]
        connection: connection::Args,
        /// Only read the registers of this group.
        #[arg(long, short = 'g')]
        group: Option<String>,
        /// Only read the register with this name (within `--group`).
        #[arg(long, short = 'n', requires = "group")]
        name: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the register map at {1:?}")]
        Load(#[source] super::LoadError, PathBuf),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("the register map has no group `{0}`")]
        UnknownGroup(String),
        #[error("group `{group}` has no register named `{name}`")]
        UnknownName { group: String, name: String },
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct Record<'a> {
        register: u32,
        group: &'a str,
        name: &'a str,
        units: &'a str,
        value: Option<&'a Value>,
        validation: Option<Validation>,
        error: Option<String>,
    }

    fn error_chain(error: &dyn std::error::Error) -> String {
        let mut message = error.to_string();
        let mut cause = error.source();
        while let Some(e) = cause {
            message.push_str(": ");
            message.push_str(&e.to_string());
            cause = e.source();
        }
        message
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let schema = super::load(&args.map).map_err(|e| Error::Load(e, args.map.clone()))?;
        let poller = Poller::new(schema);
        if let Some(group) = &args.group {
            if poller.group(group).next().is_none() {
                return Err(Error::UnknownGroup(group.clone()));
            }
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let connection = Connection::new(args.connection);
        let readings = runtime.block_on(async {
            match (&args.group, &args.name) {
                (Some(group), Some(name)) => {
                    let Some(entry) = poller.lookup(group, name) else {
                        return Err(Error::UnknownName { group: group.clone(), name: name.clone() });
                    };
                    Ok(vec![poller.poll(&connection, entry).await])
                }
                (Some(group), None) => Ok(poller.poll_group(&connection, group).await),
                (None, _) => Ok(poller.poll_all(&connection).await),
            }
        })?;

        let mut output = args.output.open(&[
            "Register", "Group", "Name", "Value", "Units", "Validation", "Error",
        ])?;
        for Reading { schema, outcome } in &readings {
            let (value, validation, error) = match outcome {
                Ok(decoded) => (Some(&decoded.value), Some(decoded.validation), None),
                Err(e) => (None, None, Some(error_chain(e))),
            };
            output.record(
                || {
                    vec![
                        schema.register.to_string(),
                        schema.group.clone(),
                        schema.name.clone(),
                        super::optional(value),
                        schema.units.clone(),
                        super::optional(validation),
                        error.clone().unwrap_or_default(),
                    ]
                },
                || Record {
                    register: schema.register,
                    group: &schema.group,
                    name: &schema.name,
                    units: &schema.units,
                    value,
                    validation,
                    error: error.clone(),
                },
            )?;
        }
        Ok(output.commit()?)
    }
}
