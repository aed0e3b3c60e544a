use super::{CollectionRef, FieldValue, RawReading, Reading, ReadingStore, StoreError};
use crate::forecast::REGRESSORS;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, Index, IntoTableRef, Order, Query, SelectStatement, SimpleExpr, Table,
    TableRef,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, DbErr, QueryResult};
use std::collections::BTreeMap;
use tracing::{debug, info};

const COL_ID: &str = "id";
const COL_CITY: &str = "city";
const COL_TIMESTAMP: &str = "timestamp";
const COL_AQI: &str = "aqi";
const OPTIONAL_NUMBER_COLUMNS: [&str; 10] = [
    "lat", "lon", "co", "no", "no2", "o3", "so2", "pm2_5", "pm10", "nh3",
];
const COL_CONDITIONS: &str = "conditions";

/// [`ReadingStore`] backed by a sea-orm connection (SQLite or Postgres)
#[derive(Debug, Clone)]
pub struct SeaOrmReadingStore {
    db: DatabaseConnection,
    collection: CollectionRef,
}

impl SeaOrmReadingStore {
    pub fn new(db: DatabaseConnection, collection: CollectionRef) -> Self {
        Self { db, collection }
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    fn table_ref(&self) -> TableRef {
        let table = Alias::new(self.collection.table());
        match self.collection.schema() {
            Some(schema) => (Alias::new(schema), table).into_table_ref(),
            None => table.into_table_ref(),
        }
    }

    fn select_city(&self, city: &str) -> SelectStatement {
        let mut query = Query::select();
        query
            .columns(
                [COL_TIMESTAMP, COL_AQI]
                    .into_iter()
                    .chain(REGRESSORS)
                    .map(Alias::new),
            )
            .from(self.table_ref())
            .and_where(Expr::col(Alias::new(COL_CITY)).eq(city));
        query
    }

    async fn query_readings(&self, query: &SelectStatement) -> Result<Vec<RawReading>, StoreError> {
        let stmt = self.db.get_database_backend().build(query);
        debug!(sql = %stmt.sql, "querying readings");
        let rows = self.db.query_all(stmt).await?;
        Ok(rows.iter().map(raw_reading).collect())
    }
}

#[async_trait]
impl ReadingStore for SeaOrmReadingStore {
    async fn fetch_city(&self, city: &str) -> Result<Vec<RawReading>, StoreError> {
        let mut query = self.select_city(city);
        query.order_by(Alias::new(COL_TIMESTAMP), Order::Asc);
        let readings = self.query_readings(&query).await?;
        info!(
            city,
            collection = %self.collection,
            rows = readings.len(),
            "fetched readings"
        );
        Ok(readings)
    }

    async fn latest_for_city(&self, city: &str) -> Result<Option<RawReading>, StoreError> {
        let mut query = self.select_city(city);
        query
            .order_by(Alias::new(COL_TIMESTAMP), Order::Desc)
            .limit(1);
        Ok(self.query_readings(&query).await?.into_iter().next())
    }

    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        let components = reading.components;
        let mut values: Vec<SimpleExpr> = vec![
            reading.city.clone().into(),
            reading.timestamp.into(),
            reading.aqi.into(),
            reading.temperature.into(),
            reading.humidity.into(),
            reading.wind_speed.into(),
            reading.conditions.clone().into(),
            reading.lat.into(),
            reading.lon.into(),
        ];
        values.extend(
            [
                components.map(|c| c.co),
                components.map(|c| c.no),
                components.map(|c| c.no2),
                components.map(|c| c.o3),
                components.map(|c| c.so2),
                components.map(|c| c.pm2_5),
                components.map(|c| c.pm10),
                components.map(|c| c.nh3),
            ]
            .into_iter()
            .map(Into::into),
        );

        let columns = [COL_CITY, COL_TIMESTAMP, COL_AQI]
            .into_iter()
            .chain(REGRESSORS)
            .chain([COL_CONDITIONS])
            .chain(OPTIONAL_NUMBER_COLUMNS);

        let mut insert = Query::insert();
        insert
            .into_table(self.table_ref())
            .columns(columns.map(Alias::new))
            .values(values)
            .map_err(|e| DbErr::Custom(e.to_string()))?;

        let stmt = self.db.get_database_backend().build(&insert);
        self.db.execute(stmt).await?;
        debug!(city = %reading.city, timestamp = %reading.timestamp, "reading stored");
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let mut table = Table::create();
        table
            .table(self.table_ref())
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new(COL_ID))
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new(COL_CITY)).string().not_null())
            .col(
                ColumnDef::new(Alias::new(COL_TIMESTAMP))
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(ColumnDef::new(Alias::new(COL_AQI)).double());
        for column in REGRESSORS {
            table.col(ColumnDef::new(Alias::new(column)).double());
        }
        table.col(ColumnDef::new(Alias::new(COL_CONDITIONS)).string());
        for column in OPTIONAL_NUMBER_COLUMNS {
            table.col(ColumnDef::new(Alias::new(column)).double());
        }

        let backend = self.db.get_database_backend();
        self.db.execute(backend.build(&table)).await?;

        // SQLite wants the schema on the index name rather than the table
        if backend != DbBackend::Sqlite || self.collection.schema().is_none() {
            let index = Index::create()
                .if_not_exists()
                .name(format!("idx_{}_city_timestamp", self.collection.table()))
                .table(self.table_ref())
                .col(Alias::new(COL_CITY))
                .col(Alias::new(COL_TIMESTAMP))
                .to_owned();
            self.db.execute(backend.build(&index)).await?;
        }

        info!(collection = %self.collection, "reading collection ready");
        Ok(())
    }
}

fn raw_reading(row: &QueryResult) -> RawReading {
    RawReading {
        timestamp: timestamp_field(row, COL_TIMESTAMP),
        aqi: number_field(row, COL_AQI),
        regressors: REGRESSORS
            .iter()
            .map(|name| (name.to_string(), number_field(row, name)))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Decodes a timestamp column without knowing how the row was written.
fn timestamp_field(row: &QueryResult, column: &str) -> FieldValue {
    if let Ok(Some(value)) = row.try_get::<Option<DateTime<Utc>>>("", column) {
        return FieldValue::DateTime(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<NaiveDateTime>>("", column) {
        return FieldValue::NaiveDateTime(value);
    }
    scalar_field(row, column)
}

fn number_field(row: &QueryResult, column: &str) -> FieldValue {
    scalar_field(row, column)
}

fn scalar_field(row: &QueryResult, column: &str) -> FieldValue {
    if let Ok(Some(value)) = row.try_get::<Option<f64>>("", column) {
        return FieldValue::Float(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>>("", column) {
        return FieldValue::Integer(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<String>>("", column) {
        return FieldValue::Text(value);
    }
    FieldValue::Null
}
