//! Warehouse tables, keyed by natural key.
//!
//! The DDL is portable between PostgreSQL and SQLite. Timestamps are RFC 3339
//! text in UTC.

pub const CREATE_ARRIVALS: &str = "
CREATE TABLE IF NOT EXISTS arrivals (
    stop_point_id    TEXT NOT NULL,
    line_id          TEXT NOT NULL,
    vehicle_id       TEXT NOT NULL,
    expected_arrival TEXT NOT NULL,
    destination_name TEXT,
    time_to_station  BIGINT NOT NULL,
    line_name        TEXT,
    station_name     TEXT,
    platform_name    TEXT,
    direction        TEXT,
    mode_name        TEXT,
    PRIMARY KEY (stop_point_id, line_id, vehicle_id, expected_arrival)
)";

pub const CREATE_LINE_ROUTES: &str = "
CREATE TABLE IF NOT EXISTS line_routes (
    line_id          TEXT NOT NULL,
    route_section    TEXT NOT NULL,
    direction        TEXT NOT NULL,
    service_type     TEXT NOT NULL,
    line_name        TEXT,
    mode_name        TEXT,
    origin_name      TEXT,
    destination_name TEXT,
    stop_point_ids   TEXT NOT NULL,
    valid_from       TEXT,
    valid_to         TEXT,
    PRIMARY KEY (line_id, route_section, direction, service_type)
)";

pub const STATEMENTS: &[&str] = &[CREATE_ARRIVALS, CREATE_LINE_ROUTES];
