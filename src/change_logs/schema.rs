diesel::table! {
    change_logs (id) {
        id -> Integer,
        entity_type -> Text,
        entity_id -> Integer,
        action -> Text,
        user_id -> Nullable<Integer>,
        changes -> Text,
        created_at -> BigInt,
    }
}
