// Diesel table definitions. Keep in sync with `repository::sqlite::SCHEMA_SQL`.

diesel::table! {
    documents (id) {
        id -> BigInt,
        original_filename -> Text,
        file_size -> BigInt,
        mime_type -> Text,
        storage_path -> Text,
        content_hash -> Text,
        status -> Text,
        error_message -> Nullable<Text>,
        ocr_provider -> Nullable<Text>,
        processing_metadata -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    extractions (id) {
        id -> BigInt,
        document_id -> BigInt,
        vendor_name -> Nullable<Text>,
        vendor_address -> Nullable<Text>,
        vendor_contact -> Nullable<Text>,
        customer_name -> Nullable<Text>,
        customer_address -> Nullable<Text>,
        invoice_number -> Nullable<Text>,
        invoice_date -> Nullable<Text>,
        due_date -> Nullable<Text>,
        currency -> Nullable<Text>,
        subtotal -> Nullable<Double>,
        tax_amount -> Nullable<Double>,
        discount -> Nullable<Double>,
        total_amount -> Nullable<Double>,
        line_items -> Text,
        handwritten_notes -> Text,
        confidence_scores -> Text,
        layout_data -> Text,
        additional_info -> Text,
        processing_metadata -> Nullable<Text>,
        markdown_output -> Nullable<Text>,
        json_output -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(extractions -> documents (document_id));

diesel::allow_tables_to_appear_in_same_query!(documents, extractions,);
