//! Handwritten Diesel schema declarations used by model structs.
//!
//! The registry tables (`power_meter`, `channels`) are created by the
//! embedded migrations. `measurements` exists in every per-device store file
//! (monthly detail and yearly aggregate share the shape) and is created on
//! first open. The declarations here only exist so we can derive
//! Insertable/Queryable in a type-safe way without running
//! `diesel print-schema`.

diesel::table! {
    power_meter (id) {
        id -> Integer,
        asset_name -> Text,
        ip_address -> Text,
        port -> Integer,
        time_zone -> Text,
        enabled -> Bool,
    }
}

diesel::table! {
    channels (id) {
        id -> Integer,
        power_meter_id -> Integer,
        channel -> Integer,
        enabled -> Bool,
    }
}

// `recorded_time` is unix epoch seconds.
diesel::table! {
    measurements (id) {
        id -> Integer,
        channel -> Integer,
        measured_value -> Double,
        recorded_time -> BigInt,
    }
}

diesel::joinable!(channels -> power_meter (power_meter_id));

diesel::allow_tables_to_appear_in_same_query!(power_meter, channels);
