//! 事实表聚合查询构建
//!
//! 列只能通过白名单枚举引用，值只能通过绑定参数传入。
//! 每次查询产生三条语句：分页的分组查询、不分页的合计查询、分组行数统计。

use std::time::Instant;

use chrono::NaiveDate;
use sea_orm::sea_query::{
    Alias, Asterisk, CaseStatement, Condition, Expr, ExprTrait, Func, Order, Query,
    SelectStatement,
};
use sea_orm::{ConnectionTrait, QueryResult};

use migration::entities::marketing_fact_daily::{Column as FactColumn, Entity as FactEntity};

use super::{BackendKind, SeaOrmStorage, retry};
use crate::errors::Result;
use crate::storage::models::{FactScope, Platform};
use crate::utils::DateRange;

/// 可分组的维度列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionColumn {
    Date,
    Platform,
    Account,
    Campaign,
}

impl DimensionColumn {
    fn column(&self) -> FactColumn {
        match self {
            DimensionColumn::Date => FactColumn::Date,
            DimensionColumn::Platform => FactColumn::Platform,
            DimensionColumn::Account => FactColumn::AccountId,
            DimensionColumn::Campaign => FactColumn::CampaignId,
        }
    }

    fn alias(&self) -> &'static str {
        match self {
            DimensionColumn::Date => "d_date",
            DimensionColumn::Platform => "d_platform",
            DimensionColumn::Account => "d_account",
            DimensionColumn::Campaign => "d_campaign",
        }
    }
}

/// 可求和的基础指标列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseColumn {
    Impressions,
    Clicks,
    Spend,
    Conversions,
    Revenue,
    Sessions,
    Leads,
}

impl BaseColumn {
    fn column(&self) -> FactColumn {
        match self {
            BaseColumn::Impressions => FactColumn::Impressions,
            BaseColumn::Clicks => FactColumn::Clicks,
            BaseColumn::Spend => FactColumn::Spend,
            BaseColumn::Conversions => FactColumn::Conversions,
            BaseColumn::Revenue => FactColumn::Revenue,
            BaseColumn::Sessions => FactColumn::Sessions,
            BaseColumn::Leads => FactColumn::Leads,
        }
    }

    fn alias(&self) -> &'static str {
        match self {
            BaseColumn::Impressions => "m_impressions",
            BaseColumn::Clicks => "m_clicks",
            BaseColumn::Spend => "m_spend",
            BaseColumn::Conversions => "m_conversions",
            BaseColumn::Revenue => "m_revenue",
            BaseColumn::Sessions => "m_sessions",
            BaseColumn::Leads => "m_leads",
        }
    }
}

/// 一个平台的读取范围：权威账号 + 分区
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformScope {
    pub platform: Platform,
    pub account_id: String,
    pub partition: FactScope,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortTarget {
    Dimension(DimensionColumn),
    Base(BaseColumn),
    /// `SUM(numerator) / SUM(denominator) * scale`，分母为 0 时为 NULL 并排在最后
    Ratio {
        numerator: BaseColumn,
        denominator: BaseColumn,
        scale: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub target: SortTarget,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub tenant_id: String,
    pub brand_id: String,
    pub range: DateRange,
    pub scopes: Vec<PlatformScope>,
    pub dimensions: Vec<DimensionColumn>,
    pub bases: Vec<BaseColumn>,
    /// 维度过滤（IN 语义；单值即等值）
    pub filters: Vec<(DimensionColumn, Vec<String>)>,
    pub sort: Option<SortKey>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// 与 `spec.dimensions` 对齐
    pub dimensions: Vec<Option<String>>,
    /// 与 `spec.bases` 对齐
    pub sums: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutput {
    pub rows: Vec<AggregateRow>,
    /// 与 `spec.bases` 对齐，独立于分页
    pub totals: Vec<f64>,
    pub total_rows: u64,
}

fn float_type(backend: BackendKind) -> &'static str {
    match backend {
        BackendKind::Postgres => "DOUBLE PRECISION",
        BackendKind::Mysql => "DOUBLE",
        BackendKind::Sqlite => "REAL",
    }
}

fn sum_expr(base: BaseColumn, backend: BackendKind) -> Expr {
    Func::cast_as(
        Func::sum(Expr::col(base.column())),
        Alias::new(float_type(backend)),
    )
    .into()
}

fn zero_denominator(denominator: BaseColumn, backend: BackendKind) -> Expr {
    let den: Expr = Func::coalesce([sum_expr(denominator, backend), Expr::val(0.0)]).into();
    den.eq(0.0)
}

/// 派生指标排序表达式；分母为 0 时避免除零
fn ratio_expr(numerator: BaseColumn, denominator: BaseColumn, scale: f64, backend: BackendKind) -> Expr {
    CaseStatement::new()
        .case(
            zero_denominator(denominator, backend),
            Expr::val(Option::<f64>::None),
        )
        .finally(
            sum_expr(numerator, backend)
                .div(sum_expr(denominator, backend))
                .mul(scale),
        )
        .into()
}

fn scope_condition(scope: &PlatformScope) -> Condition {
    let partition = match scope.partition {
        FactScope::Aggregated => Expr::col(FactColumn::CampaignId).is_null(),
        FactScope::Campaign => Expr::col(FactColumn::CampaignId).is_not_null(),
    };
    Condition::all()
        .add(Expr::col(FactColumn::Platform).eq(scope.platform.as_str()))
        .add(Expr::col(FactColumn::AccountId).eq(scope.account_id.as_str()))
        .add(partition)
}

fn filter_condition(column: DimensionColumn, values: &[String]) -> Expr {
    match column {
        DimensionColumn::Date => {
            let dates: Vec<NaiveDate> = values
                .iter()
                .filter_map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
                .collect();
            Expr::col(FactColumn::Date).is_in(dates)
        }
        other => Expr::col(other.column()).is_in(values.iter().map(String::as_str)),
    }
}

fn where_condition(spec: &AggregateSpec) -> Condition {
    let mut scopes = Condition::any();
    for scope in &spec.scopes {
        scopes = scopes.add(scope_condition(scope));
    }

    let mut cond = Condition::all()
        .add(Expr::col(FactColumn::TenantId).eq(spec.tenant_id.as_str()))
        .add(Expr::col(FactColumn::BrandId).eq(spec.brand_id.as_str()))
        .add(Expr::col(FactColumn::Date).gte(spec.range.start))
        .add(Expr::col(FactColumn::Date).lte(spec.range.end))
        .add(scopes);
    for (column, values) in &spec.filters {
        cond = cond.add(filter_condition(*column, values));
    }
    cond
}

fn grouped_select(spec: &AggregateSpec, backend: BackendKind) -> SelectStatement {
    let mut select = Query::select();
    select.from(FactEntity);
    for dim in &spec.dimensions {
        select.expr_as(Expr::col(dim.column()), Alias::new(dim.alias()));
    }
    for base in &spec.bases {
        select.expr_as(sum_expr(*base, backend), Alias::new(base.alias()));
    }
    select.cond_where(where_condition(spec));
    for dim in &spec.dimensions {
        select.group_by_col(dim.column());
    }
    select
}

/// 分页查询：排序键 + 全部维度升序作为稳定的次序
pub(crate) fn page_statement(spec: &AggregateSpec, backend: BackendKind) -> SelectStatement {
    let mut select = grouped_select(spec, backend);

    if let Some(sort) = &spec.sort {
        let order = if sort.descending {
            Order::Desc
        } else {
            Order::Asc
        };
        match &sort.target {
            SortTarget::Dimension(dim) => {
                select.order_by(dim.column(), order);
            }
            SortTarget::Base(base) => {
                select.order_by_expr(sum_expr(*base, backend), order);
            }
            SortTarget::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                let nulls_last: Expr = CaseStatement::new()
                    .case(zero_denominator(*denominator, backend), 1)
                    .finally(0)
                    .into();
                select.order_by_expr(nulls_last, Order::Asc);
                select.order_by_expr(
                    ratio_expr(*numerator, *denominator, *scale, backend),
                    order,
                );
            }
        }
    }
    for dim in &spec.dimensions {
        select.order_by(dim.column(), Order::Asc);
    }

    select.limit(spec.limit).offset(spec.offset);
    select
}

pub(crate) fn totals_statement(spec: &AggregateSpec, backend: BackendKind) -> SelectStatement {
    let mut select = Query::select();
    select.from(FactEntity);
    for base in &spec.bases {
        select.expr_as(sum_expr(*base, backend), Alias::new(base.alias()));
    }
    select.cond_where(where_condition(spec));
    select
}

pub(crate) fn count_statement(spec: &AggregateSpec, backend: BackendKind) -> SelectStatement {
    let mut inner = grouped_select(spec, backend);
    let mut select_count = 0usize;
    inner.exprs_mut_for_each(|_| select_count += 1);
    if select_count == 0 {
        inner.expr(Expr::val(1));
    }
    Query::select()
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("total_rows"))
        .from_subquery(inner, Alias::new("grouped"))
        .to_owned()
}

fn read_sums(row: &QueryResult, bases: &[BaseColumn]) -> Result<Vec<f64>> {
    bases
        .iter()
        .map(|base| {
            let value: Option<f64> = row.try_get("", base.alias())?;
            Ok(value.unwrap_or(0.0))
        })
        .collect()
}

fn read_row(row: &QueryResult, spec: &AggregateSpec) -> Result<AggregateRow> {
    let mut dimensions = Vec::with_capacity(spec.dimensions.len());
    for dim in &spec.dimensions {
        let value = match dim {
            DimensionColumn::Date => row
                .try_get::<Option<NaiveDate>>("", dim.alias())?
                .map(|d| d.format("%Y-%m-%d").to_string()),
            _ => row.try_get::<Option<String>>("", dim.alias())?,
        };
        dimensions.push(value);
    }
    Ok(AggregateRow {
        dimensions,
        sums: read_sums(row, &spec.bases)?,
    })
}

/// 无可读范围时的结果：无维度返回一行零值，与 SQL 聚合语义一致
fn empty_output(spec: &AggregateSpec) -> AggregateOutput {
    let zeros = vec![0.0; spec.bases.len()];
    let rows = if spec.dimensions.is_empty() && spec.offset == 0 && spec.limit > 0 {
        vec![AggregateRow {
            dimensions: Vec::new(),
            sums: zeros.clone(),
        }]
    } else {
        Vec::new()
    };
    AggregateOutput {
        rows,
        totals: zeros,
        total_rows: u64::from(spec.dimensions.is_empty()),
    }
}

impl SeaOrmStorage {
    /// 执行分组、合计、行数三条查询
    pub async fn aggregate(&self, spec: &AggregateSpec) -> Result<AggregateOutput> {
        if spec.scopes.is_empty() {
            return Ok(empty_output(spec));
        }

        let started = Instant::now();
        let db_backend = self.backend.db_backend();
        let page = db_backend.build(&page_statement(spec, self.backend));
        let totals = db_backend.build(&totals_statement(spec, self.backend));
        let count = db_backend.build(&count_statement(spec, self.backend));

        let db = &self.db;
        let config = self.retry_config();
        let (page_rows, totals_row, count_row) = tokio::try_join!(
            retry::with_retry("aggregate_page", config, || db.query_all_raw(page.clone())),
            retry::with_retry("aggregate_totals", config, || db.query_one_raw(totals.clone())),
            retry::with_retry("aggregate_count", config, || db.query_one_raw(count.clone())),
        )?;

        let rows = page_rows
            .iter()
            .map(|row| read_row(row, spec))
            .collect::<Result<Vec<_>>>()?;
        let totals = match totals_row {
            Some(row) => read_sums(&row, &spec.bases)?,
            None => vec![0.0; spec.bases.len()],
        };
        let total_rows = match count_row {
            Some(row) => Ord::max(row.try_get::<i64>("", "total_rows")?, 0) as u64,
            None => 0,
        };

        self.metrics
            .observe_db_query("aggregate", started.elapsed().as_secs_f64());
        Ok(AggregateOutput {
            rows,
            totals,
            total_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::{PostgresQueryBuilder, SqliteQueryBuilder};

    fn spec() -> AggregateSpec {
        AggregateSpec {
            tenant_id: "tenant-secret".to_string(),
            brand_id: "brand-secret".to_string(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),
            )
            .unwrap(),
            scopes: vec![PlatformScope {
                platform: Platform::Ga4,
                account_id: "properties/123".to_string(),
                partition: FactScope::Aggregated,
            }],
            dimensions: vec![DimensionColumn::Date],
            bases: vec![BaseColumn::Clicks, BaseColumn::Impressions],
            filters: vec![(DimensionColumn::Campaign, vec!["x'; DROP TABLE".to_string()])],
            sort: Some(SortKey {
                target: SortTarget::Ratio {
                    numerator: BaseColumn::Clicks,
                    denominator: BaseColumn::Impressions,
                    scale: 1.0,
                },
                descending: true,
            }),
            limit: 5,
            offset: 10,
        }
    }

    #[test]
    fn test_values_are_bound_not_inlined() {
        let (sql, values) = page_statement(&spec(), BackendKind::Sqlite).build(SqliteQueryBuilder);
        assert!(!sql.contains("tenant-secret"));
        assert!(!sql.contains("DROP TABLE"));
        assert!(sql.contains("GROUP BY"));
        assert!(sql.contains("LIMIT"));
        assert!(sql.contains("CASE WHEN"));
        assert!(!values.0.is_empty());
    }

    #[test]
    fn test_backend_specific_float_cast() {
        let (pg, _) = totals_statement(&spec(), BackendKind::Postgres).build(PostgresQueryBuilder);
        assert!(pg.contains("DOUBLE PRECISION"));
        assert!(!pg.contains("GROUP BY"));
        assert!(!pg.contains("LIMIT"));

        let (lite, _) = totals_statement(&spec(), BackendKind::Sqlite).build(SqliteQueryBuilder);
        assert!(lite.contains("AS REAL"));
    }

    #[test]
    fn test_count_wraps_grouped_query() {
        let (sql, _) = count_statement(&spec(), BackendKind::Sqlite).build(SqliteQueryBuilder);
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains("GROUP BY"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_empty_scopes_yield_zero_output() {
        let mut s = spec();
        s.scopes.clear();
        let out = empty_output(&s);
        assert!(out.rows.is_empty());
        assert_eq!(out.totals, vec![0.0, 0.0]);

        s.dimensions.clear();
        s.offset = 0;
        let out = empty_output(&s);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.total_rows, 1);
    }
}
