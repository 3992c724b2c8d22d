diesel::table! {
    remotes (id) {
        id -> Integer,
        device_id -> Nullable<Integer>,
        name -> Text,
        manufacturer -> Nullable<Text>,
        model -> Nullable<Text>,
        description -> Nullable<Text>,
        layout -> Text,
        image_url -> Nullable<Text>,
        dimensions -> Text,
        buttons -> Text,
        zones -> Text,
        is_default -> Bool,
        usage_count -> Integer,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
