diesel::table! {
    devices (id) {
        id -> Integer,
        name -> Text,
        manufacturer -> Nullable<Text>,
        model -> Nullable<Text>,
        description -> Nullable<Text>,
        image_url -> Nullable<Text>,
        order_index -> Integer,
        is_active -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}
