//! Fixture loading and phase execution.
//!
//! A [`Fixture`] is the resolved form of one [`Configuration`]: its resources
//! have been parsed into a [`FixtureData`] and it can plan and run the SETUP,
//! TEARDOWN and ROLLBACK phases against a database reached through a
//! [`ConnectionProvider`] and an [`Executor`].

use std::fmt;

use log::{debug, error, info};

use crate::{
    config::{ConnectionSettings, Configuration},
    decorator::{DatasetDecorator, ReplacementDecorator},
    error::{DatabaseError, FixtureError, Result},
    format::{DtdFormat, ParseContext, load_multiple},
    model::{DataSet, Dataset, FixtureData, Table},
    operation::DbOperation,
    plan::{OperationPlan, Phase},
    resource::{LocationConventions, ResourceResolver},
    schema_source::SchemaSource,
};

/// A connection plus whether the caller keeps ownership of it.
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    connection: C,
    caller_owned: bool,
}

impl<C> ConnectionHandle<C> {
    /// A connection the fixture may release once a phase is over.
    pub fn owned(connection: C) -> Self {
        Self {
            connection,
            caller_owned: false,
        }
    }

    /// A connection that belongs to the caller, for example one bound to an
    /// enclosing transaction. The fixture never releases it.
    pub fn caller_owned(connection: C) -> Self {
        Self {
            connection,
            caller_owned: true,
        }
    }

    pub fn is_caller_owned(&self) -> bool {
        self.caller_owned
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn into_inner(self) -> C {
        self.connection
    }
}

pub trait ConnectionProvider {
    type Connection;

    fn acquire(
        &mut self,
        settings: &ConnectionSettings,
    ) -> std::result::Result<ConnectionHandle<Self::Connection>, DatabaseError>;

    fn release(&mut self, handle: ConnectionHandle<Self::Connection>);
}

/// Applies one atomic operation to one table.
pub trait Executor<C> {
    fn execute(
        &mut self,
        connection: &mut C,
        operation: DbOperation,
        table: &Table,
    ) -> std::result::Result<(), DatabaseError>;
}

/// Outcome of a TEARDOWN or ROLLBACK phase. Failures are reported here and
/// logged instead of being returned as errors, so they never hide the
/// failure of the test that ran before.
#[derive(Debug)]
pub struct TeardownReport {
    pub phase: Phase,
    pub operations_applied: usize,
    pub failure: Option<FixtureError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<()> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "{} applied {} operation(s)", self.phase, self.operations_applied),
            Some(err) => write!(
                f,
                "{} stopped after {} operation(s): {err}",
                self.phase, self.operations_applied
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fixture {
    configuration: Configuration,
    data: FixtureData,
}

impl Fixture {
    /// Resolves and parses every location of `configuration`.
    pub fn load(configuration: Configuration, resolver: &dyn ResourceResolver) -> Result<Self> {
        let data = load_data(&configuration, &configuration.locations, resolver)?;
        Ok(Self {
            configuration,
            data,
        })
    }

    /// Like [`Fixture::load`], applying the location conventions of `unit`
    /// first (default dataset name, unit-relative locations).
    pub fn load_for_unit(
        configuration: Configuration,
        unit: &str,
        resolver: &dyn ResourceResolver,
    ) -> Result<Self> {
        let locations = LocationConventions::for_unit(unit).apply(&configuration.locations);
        debug!("Locations for {unit}: {}", locations.join(", "));
        let data = load_data(&configuration, &locations, resolver)?;
        Ok(Self {
            configuration,
            data,
        })
    }

    pub fn from_data(configuration: Configuration, data: FixtureData) -> Self {
        Self {
            configuration,
            data,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn data(&self) -> &FixtureData {
        &self.data
    }

    pub fn plan(&self, phase: Phase) -> OperationPlan {
        OperationPlan::for_phase(
            phase,
            &self.configuration.set_up_operation,
            &self.configuration.tear_down_operation,
            self.data.members(),
        )
    }

    /// Runs SETUP. The first executor failure aborts the phase.
    pub fn setup<P, E>(&self, provider: &mut P, executor: &mut E) -> Result<()>
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        self.run_phase(Phase::Setup, provider, executor).map(|_| ())
    }

    pub fn teardown<P, E>(&self, provider: &mut P, executor: &mut E) -> TeardownReport
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        self.run_reverting(Phase::Teardown, provider, executor)
    }

    pub fn rollback<P, E>(&self, provider: &mut P, executor: &mut E) -> TeardownReport
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        self.run_reverting(Phase::Rollback, provider, executor)
    }

    fn run_reverting<P, E>(&self, phase: Phase, provider: &mut P, executor: &mut E) -> TeardownReport
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        let mut applied = 0;
        let outcome = self.run_phase_counting(phase, provider, executor, &mut applied);
        let failure = outcome.err();
        if let Some(err) = &failure {
            error!("{}", err.format_detailed());
        }
        TeardownReport {
            phase,
            operations_applied: applied,
            failure,
        }
    }

    /// Runs `phase` and returns the number of table operations applied.
    pub fn run_phase<P, E>(&self, phase: Phase, provider: &mut P, executor: &mut E) -> Result<usize>
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        let mut applied = 0;
        self.run_phase_counting(phase, provider, executor, &mut applied)?;
        Ok(applied)
    }

    fn run_phase_counting<P, E>(
        &self,
        phase: Phase,
        provider: &mut P,
        executor: &mut E,
        applied: &mut usize,
    ) -> Result<()>
    where
        P: ConnectionProvider,
        E: Executor<P::Connection>,
    {
        let plan = self.plan(phase);
        if plan.is_empty() {
            debug!("{phase}: nothing to do");
            return Ok(());
        }
        let mut handle = provider
            .acquire(&self.configuration.connection)
            .map_err(|source| FixtureError::Connection { phase, source })?;
        let outcome = execute_plan(&plan, self.data.members(), handle.connection(), executor, applied);
        if handle.is_caller_owned() {
            debug!("{phase}: leaving caller-owned connection open");
        } else {
            provider.release(handle);
        }
        outcome
    }
}

fn execute_plan<C, E>(
    plan: &OperationPlan,
    members: &[Dataset],
    connection: &mut C,
    executor: &mut E,
    applied: &mut usize,
) -> Result<()>
where
    E: Executor<C>,
{
    let phase = plan.phase();
    info!("{phase}: running {} step(s)", plan.steps().len());
    for (operation, member, table_name) in plan.table_operations() {
        let table = members
            .get(member)
            .ok_or_else(|| FixtureError::NoSuchTable(table_name.to_string()))?
            .table(table_name)?;
        debug!("{phase}: {operation} {table_name} ({} row(s))", table.row_count());
        if let Err(source) = executor.execute(connection, operation, table) {
            if let Some(cause) = source.next_error() {
                error!("{phase}: {operation} on {table_name} failed; underlying cause: {cause}");
            }
            return Err(FixtureError::FixtureLoad {
                phase,
                operation,
                table: table_name.to_string(),
                source,
            });
        }
        *applied += 1;
    }
    Ok(())
}

/// Resolves `locations` and parses them with the configured format, then
/// applies the configured replacements.
pub fn load_data(
    configuration: &Configuration,
    locations: &[String],
    resolver: &dyn ResourceResolver,
) -> Result<FixtureData> {
    configuration.validate()?;
    let options = &configuration.format_options;
    let base_ctx = ParseContext::new(options);

    let schema_source: Option<SchemaSource> = match options.dtd_location.as_deref() {
        Some(location) => {
            let resource = resolver
                .resolve(location)?
                .into_iter()
                .next()
                .ok_or_else(|| FixtureError::configuration(format!("DTD '{location}' not found")))?;
            Some(DtdFormat::schema_source(&resource, &base_ctx)?)
        }
        None => None,
    };
    let ctx = base_ctx.with_schema_source(schema_source.as_ref());

    let resources = resolver.resolve_all(locations)?;
    let strategy = configuration.format.strategy();
    let datasets = load_multiple(strategy.as_ref(), &resources, &ctx)?;

    let decorator = ReplacementDecorator::new(configuration.replacements.clone())?;
    let datasets = datasets
        .into_iter()
        .map(|dataset| decorator.decorate(dataset))
        .collect::<Result<Vec<_>>>()?;
    let data = FixtureData::from_datasets(datasets)?;
    info!(
        "Loaded {} dataset(s) with {} table(s)",
        data.members().len(),
        data.table_names().len()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResolver;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Vec<(DbOperation, String)>,
        fail_on: Option<(DbOperation, String)>,
    }

    impl Executor<()> for RecordingExecutor {
        fn execute(
            &mut self,
            _connection: &mut (),
            operation: DbOperation,
            table: &Table,
        ) -> std::result::Result<(), DatabaseError> {
            if self
                .fail_on
                .as_ref()
                .is_some_and(|(op, name)| *op == operation && name == table.name())
            {
                return Err(DatabaseError::batch(
                    "batch failed",
                    Some(DatabaseError::statement("FK violation")),
                ));
            }
            self.calls.push((operation, table.name().to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        caller_owned: bool,
        acquired: usize,
        released: usize,
    }

    impl ConnectionProvider for CountingProvider {
        type Connection = ();

        fn acquire(
            &mut self,
            _settings: &ConnectionSettings,
        ) -> std::result::Result<ConnectionHandle<()>, DatabaseError> {
            self.acquired += 1;
            Ok(if self.caller_owned {
                ConnectionHandle::caller_owned(())
            } else {
                ConnectionHandle::owned(())
            })
        }

        fn release(&mut self, _handle: ConnectionHandle<()>) {
            self.released += 1;
        }
    }

    fn fixture(configuration: Configuration) -> Fixture {
        let resolver = MemoryResolver::new()
            .with("a.xml", r#"<dataset><A ID="1"/><B ID="2"/></dataset>"#)
            .with("b.xml", r#"<dataset><C ID="3"/></dataset>"#);
        Fixture::load(configuration, &resolver).unwrap()
    }

    fn calls(executor: &RecordingExecutor) -> Vec<String> {
        executor
            .calls
            .iter()
            .map(|(op, table)| format!("{op} {table}"))
            .collect()
    }

    #[test]
    fn setup_then_teardown_across_members() {
        let fixture = fixture(
            Configuration::builder()
                .locations(["a.xml", "b.xml"])
                .tear_down([DbOperation::DeleteAll])
                .build()
                .unwrap(),
        );
        let mut provider = CountingProvider::default();
        let mut executor = RecordingExecutor::default();
        fixture.setup(&mut provider, &mut executor).unwrap();
        assert_eq!(
            calls(&executor),
            vec!["DELETE_ALL B", "DELETE_ALL A", "INSERT A", "INSERT B", "INSERT C"]
        );

        executor.calls.clear();
        let report = fixture.teardown(&mut provider, &mut executor);
        assert!(report.is_clean());
        assert_eq!(report.operations_applied, 3);
        assert_eq!(calls(&executor), vec!["DELETE_ALL C", "DELETE_ALL B", "DELETE_ALL A"]);
        assert_eq!((provider.acquired, provider.released), (2, 2));
    }

    #[test]
    fn setup_failure_names_phase_operation_and_table() {
        let fixture = fixture(Configuration::builder().location("a.xml").build().unwrap());
        let mut provider = CountingProvider::default();
        let mut executor = RecordingExecutor {
            fail_on: Some((DbOperation::Insert, "B".to_string())),
            ..RecordingExecutor::default()
        };
        let err = fixture.setup(&mut provider, &mut executor).unwrap_err();
        assert!(matches!(
            &err,
            FixtureError::FixtureLoad { phase: Phase::Setup, operation: DbOperation::Insert, table, .. } if table == "B"
        ));
        assert_eq!(calls(&executor), vec!["DELETE_ALL B", "DELETE_ALL A", "INSERT A"]);
        assert_eq!(provider.released, 1);
    }

    #[test]
    fn teardown_failure_is_reported_not_raised() {
        let fixture = fixture(
            Configuration::builder()
                .location("a.xml")
                .tear_down([DbOperation::DeleteAll])
                .build()
                .unwrap(),
        );
        let mut provider = CountingProvider::default();
        let mut executor = RecordingExecutor {
            fail_on: Some((DbOperation::DeleteAll, "A".to_string())),
            ..RecordingExecutor::default()
        };
        let report = fixture.teardown(&mut provider, &mut executor);
        assert!(!report.is_clean());
        assert_eq!(report.operations_applied, 1);
        assert!(report.to_string().starts_with("TEARDOWN stopped after 1 operation(s)"));
    }

    #[test]
    fn caller_owned_connections_are_not_released() {
        let fixture = fixture(Configuration::builder().location("a.xml").build().unwrap());
        let mut provider = CountingProvider {
            caller_owned: true,
            ..CountingProvider::default()
        };
        let mut executor = RecordingExecutor::default();
        fixture.setup(&mut provider, &mut executor).unwrap();
        assert_eq!((provider.acquired, provider.released), (1, 0));
    }

    #[test]
    fn rollback_deletes_when_teardown_is_none() {
        let fixture = fixture(Configuration::builder().location("a.xml").build().unwrap());
        let mut provider = CountingProvider::default();
        let mut executor = RecordingExecutor::default();

        let teardown = fixture.teardown(&mut provider, &mut executor);
        assert_eq!(teardown.operations_applied, 0);
        assert_eq!(provider.acquired, 0);

        let rollback = fixture.rollback(&mut provider, &mut executor);
        assert!(rollback.is_clean());
        assert_eq!(calls(&executor), vec!["DELETE_ALL B", "DELETE_ALL A"]);
    }

    #[test]
    fn conventions_supply_default_location() {
        let resolver =
            MemoryResolver::new().with("com/acme/dataSet.xml", r#"<dataset><T ID="1"/></dataset>"#);
        let fixture = Fixture::load_for_unit(
            Configuration::builder().build().unwrap(),
            "com/acme/UserTest",
            &resolver,
        )
        .unwrap();
        assert_eq!(fixture.data().table_names(), vec!["T"]);
    }

    #[test]
    fn dtd_location_supplies_metadata() {
        let resolver = MemoryResolver::new()
            .with("schema.dtd", "<!ELEMENT dataset (T*)><!ELEMENT T EMPTY><!ATTLIST T ID CDATA #REQUIRED NOTE CDATA #IMPLIED>")
            .with("t.xml", r#"<dataset><T ID="1"/></dataset>"#);
        let configuration = Configuration::builder()
            .location("t.xml")
            .dtd_location("schema.dtd")
            .build()
            .unwrap();
        let fixture = Fixture::load(configuration, &resolver).unwrap();
        let table = fixture.data().table("T").unwrap();
        assert_eq!(table.schema().column_names().collect::<Vec<_>>(), vec!["ID", "NOTE"]);
    }

    #[test]
    fn no_locations_is_a_configuration_error() {
        let err = Fixture::load(Configuration::default(), &MemoryResolver::new()).unwrap_err();
        assert!(matches!(err, FixtureError::Configuration(_)));
    }
}
