//! Static company and property knowledge fed to the reasoning service.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Property {
    pub id: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bhk: Option<u8>,
    pub price: &'static str,
    pub location: &'static str,
    pub area: &'static str,
    pub amenities: &'static [&'static str],
    pub description: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Company {
    pub name: &'static str,
    pub established: u16,
    pub head_office: &'static str,
    pub branch_offices: &'static [&'static str],
    pub total_deals: &'static str,
    pub customer_rating: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankRate {
    pub name: &'static str,
    pub rate: &'static str,
    pub max_tenure: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanInfo {
    pub banks: &'static [BankRate],
    pub max_loan_percentage: &'static str,
    pub tax_benefits: &'static str,
    pub processing_time: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscountPolicy {
    pub ready_properties: &'static str,
    pub full_payment: &'static str,
    pub festival_offers: &'static str,
    pub corporate_discount: &'static str,
    pub referral_bonus: &'static str,
}

pub const COMPANY: Company = Company {
    name: "Chakka Estates India",
    established: 2005,
    head_office: "Bandra Kurla Complex, Mumbai",
    branch_offices: &["Andheri", "Powai", "Thane", "Navi Mumbai", "Pune"],
    total_deals: "12,500+ properties",
    customer_rating: "4.8/5",
};

pub const PROPERTIES: &[Property] = &[
    Property {
        id: "V001",
        kind: "villa",
        bhk: Some(4),
        price: "2.5 Crore",
        location: "Andheri East, Mumbai",
        area: "2500 sq.ft.",
        amenities: &["swimming pool", "private garden", "parking", "security", "home theater"],
        description: "Luxurious 4BHK villa with modern amenities",
        status: "ready to move",
    },
    Property {
        id: "V002",
        kind: "villa",
        bhk: Some(3),
        price: "1.8 Crore",
        location: "Powai, Mumbai",
        area: "1800 sq.ft.",
        amenities: &["garden", "parking", "club house", "gym"],
        description: "Beautiful 3BHK villa in prime location",
        status: "ready to move",
    },
    Property {
        id: "F001",
        kind: "flat",
        bhk: Some(2),
        price: "95 Lakhs",
        location: "Borivali West, Mumbai",
        area: "850 sq.ft.",
        amenities: &["gym", "swimming pool", "children's play area", "club house"],
        description: "Modern 2BHK flat with excellent amenities",
        status: "ready to move",
    },
    Property {
        id: "F002",
        kind: "flat",
        bhk: Some(3),
        price: "1.45 Crore",
        location: "Malad East, Mumbai",
        area: "1200 sq.ft.",
        amenities: &["gym", "park", "security", "shopping center nearby"],
        description: "Spacious 3BHK flat with excellent ventilation",
        status: "ready to move",
    },
    Property {
        id: "PH001",
        kind: "penthouse",
        bhk: Some(4),
        price: "5.5 Crore",
        location: "Worli, Mumbai",
        area: "3500 sq.ft.",
        amenities: &["private terrace", "jacuzzi", "panoramic view", "private elevator"],
        description: "Luxury penthouse with 360-degree view",
        status: "ready to move",
    },
    Property {
        id: "FH001",
        kind: "farm house",
        bhk: Some(3),
        price: "3.5 Crore",
        location: "Lonavala",
        area: "4500 sq.ft.",
        amenities: &["private pool", "orchard", "staff quarters", "party lawn"],
        description: "Beautiful farm house with mango orchard",
        status: "ready to move",
    },
    Property {
        id: "P001",
        kind: "plot",
        bhk: None,
        price: "85 Lakhs",
        location: "Lonavala",
        area: "1200 sq.ft.",
        amenities: &[],
        description: "Corner plot with road access",
        status: "immediate possession",
    },
    Property {
        id: "LX001",
        kind: "sea-facing villa",
        bhk: Some(6),
        price: "12.5 Crore",
        location: "Juhu, Mumbai",
        area: "6500 sq.ft.",
        amenities: &["private beach access", "helipad", "infinity pool", "wine cellar"],
        description: "Celebrity-style sea-facing mansion",
        status: "ready to move",
    },
];

pub const LOAN_INFO: LoanInfo = LoanInfo {
    banks: &[
        BankRate { name: "SBI", rate: "8.5%", max_tenure: "30 years" },
        BankRate { name: "HDFC", rate: "8.65%", max_tenure: "30 years" },
        BankRate { name: "ICICI", rate: "8.7%", max_tenure: "30 years" },
        BankRate { name: "Axis", rate: "8.75%", max_tenure: "30 years" },
    ],
    max_loan_percentage: "80-90% of property value",
    tax_benefits: "Under Section 24(b) and 80C",
    processing_time: "7-10 working days",
};

pub const DISCOUNT_POLICY: DiscountPolicy = DiscountPolicy {
    ready_properties: "5-10% discount negotiable",
    full_payment: "Additional 2-3% discount",
    festival_offers: "Diwali: extra 5% off, New Year: 3% off",
    corporate_discount: "Special rates for group bookings",
    referral_bonus: "₹50,000 for successful referral",
};

pub const AREA_INFO: &[(&str, &str)] = &[
    (
        "Andheri",
        "Commercial hub with excellent connectivity. Near International Airport, SEEPZ, MIDC. Good schools and hospitals.",
    ),
    (
        "Bandra",
        "Premium locality, entertainment hub. Bandra-Worli Sea Link, Linking Road shopping. High-end restaurants.",
    ),
    (
        "Powai",
        "IT hub with lakeside living. Hiranandani complex, IIT Bombay. Excellent for professionals.",
    ),
    (
        "Borivali",
        "Family-friendly, near Sanjay Gandhi National Park. Good schools, affordable housing.",
    ),
    (
        "Worli",
        "Business district with sea-facing properties. Worli Sea Face, upcoming infrastructure.",
    ),
    (
        "Juhu",
        "Bollywood hub, beachfront properties. Premium area with excellent social life.",
    ),
];

const LOAN_KEYWORDS: &[&str] = &["loan", "emi", "bank", "interest", "mortgage", "finance", "funding"];
const DISCOUNT_KEYWORDS: &[&str] = &["discount", "offer", "festival", "deal", "negotiable"];

/// Properties always included in the reasoning context.
const SAMPLE_PROPERTIES: usize = 4;

pub fn find_property(id: &str) -> Option<&'static Property> {
    PROPERTIES.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| keywords.iter().any(|k| word.eq_ignore_ascii_case(k)))
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Company facts for one user utterance.
///
/// Loan, discount and neighbourhood details are only included when the
/// utterance touches on them.
pub fn company_context(user_text: &str) -> String {
    let sample = &PROPERTIES[..SAMPLE_PROPERTIES.min(PROPERTIES.len())];
    let mut context = format!(
        "Company Name: {}\nEstablished: {}\nHead Office: {}\nCustomer Rating: {}\n\nSample Properties:\n{}\n",
        COMPANY.name,
        COMPANY.established,
        COMPANY.head_office,
        COMPANY.customer_rating,
        to_json(&sample),
    );

    if mentions_any(user_text, LOAN_KEYWORDS) {
        context.push_str("\nLoan Information:\n");
        context.push_str(&to_json(&LOAN_INFO));
        context.push('\n');
    }
    if mentions_any(user_text, DISCOUNT_KEYWORDS) {
        context.push_str("\nDiscount Policy:\n");
        context.push_str(&to_json(&DISCOUNT_POLICY));
        context.push('\n');
    }

    let lower = user_text.to_lowercase();
    for (area, info) in AREA_INFO {
        if lower.contains(&area.to_lowercase()) {
            context.push_str(&format!("\nAbout {}: {}\n", area, info));
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_property_is_case_insensitive() {
        assert_eq!(find_property("ph001").map(|p| p.kind), Some("penthouse"));
        assert!(find_property("X999").is_none());
    }

    #[test]
    fn test_context_always_has_company_and_samples() {
        let context = company_context("hello");
        assert!(context.contains("Company Name: Chakka Estates India"));
        assert!(context.contains("\"V001\""));
        assert!(context.contains("\"F002\""));
        assert!(!context.contains("\"PH001\""));
        assert!(!context.contains("Loan Information"));
        assert!(!context.contains("Discount Policy"));
    }

    #[test]
    fn test_context_adds_loan_info_on_keyword() {
        let context = company_context("What would the EMI be?");
        assert!(context.contains("Loan Information"));
        assert!(context.contains("HDFC"));
    }

    #[test]
    fn test_context_adds_discount_policy_on_keyword() {
        let context = company_context("Any festival offer running?");
        assert!(context.contains("Discount Policy"));
        assert!(!context.contains("Loan Information"));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "interesting" must not pull in loan details
        assert!(!company_context("That sounds interesting").contains("Loan Information"));
    }

    #[test]
    fn test_context_adds_area_info() {
        let context = company_context("Something in powai please");
        assert!(context.contains("About Powai: IT hub"));
    }

    #[test]
    fn test_plot_omits_bhk() {
        let json = serde_json::to_value(find_property("P001").unwrap()).unwrap();
        assert!(json.get("bhk").is_none());
        assert_eq!(json["type"], "plot");
    }
}
