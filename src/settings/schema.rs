diesel::table! {
    site_settings (id) {
        id -> Integer,
        key -> Text,
        value -> Text,
        description -> Nullable<Text>,
        updated_at -> BigInt,
    }
}
