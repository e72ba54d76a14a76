//! Diesel table definitions for sites and their builds.

diesel::table! {
    sites (id) {
        id -> Int8,
        account_id -> Int8,
        site_key -> Varchar,
        site_type -> Varchar,
        status -> Varchar,
        last_build_number -> Int8,
        published_version -> Int4,
        maintenance_mode -> Bool,
        last_preview_build -> Nullable<Int8>,
        last_publish_build -> Nullable<Int8>,
        settings -> Jsonb,
        create_date -> Timestamptz,
        write_date -> Timestamptz,
    }
}

diesel::table! {
    site_builds (id) {
        id -> Int8,
        account_id -> Int8,
        site_id -> Int8,
        site_build_number -> Int8,
        initiating_user_id -> Nullable<Int8>,
        build_type -> Varchar,
        status -> Varchar,
        data -> Nullable<Jsonb>,
        create_date -> Timestamptz,
        queued_date -> Nullable<Timestamptz>,
        started_date -> Nullable<Timestamptz>,
        completed_date -> Nullable<Timestamptz>,
        failure_message -> Nullable<Text>,
    }
}

diesel::joinable!(site_builds -> sites (site_id));
diesel::allow_tables_to_appear_in_same_query!(sites, site_builds);
