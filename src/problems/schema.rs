diesel::table! {
    problems (id) {
        id -> Integer,
        device_id -> Nullable<Integer>,
        title -> Text,
        description -> Nullable<Text>,
        category -> Text,
        icon -> Nullable<Text>,
        color -> Nullable<Text>,
        tags -> Text,
        priority -> Integer,
        estimated_minutes -> Nullable<Integer>,
        is_popular -> Bool,
        status -> Text,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
