//! Table lists used for verification and diagnostics

/// Tables every supported schema version is expected to carry
pub const CRITICAL_TABLES: &[&str] = &[
    "patients",
    "appointments",
    "payments",
    "treatments",
    "dental_treatments",
    "dental_treatment_images",
    "settings",
    "schema_version",
];

/// Clinic tables sampled for row counts only
pub const EXPECTED_TABLES: &[&str] = &[
    "clinic_expenses",
    "clinic_needs",
    "inventory",
    "inventory_usage",
    "lab_orders",
    "labs",
    "medications",
    "patient_images",
    "patient_treatment_timeline",
    "prescription_medications",
    "prescriptions",
    "smart_alerts",
    "tooth_treatment_images",
    "tooth_treatments",
    "treatment_plan_items",
    "treatment_plans",
    "treatment_sessions",
    "whatsapp_reminders",
];
