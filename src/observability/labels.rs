//! Closed label vocabularies for every metric the mesh emits.
//!
//! Metric label values are only ever produced by these enums, so registry
//! cardinality is fixed at compile time no matter what requests arrive.

use axum::extract::MatchedPath;
use axum::http::{Method, Request, StatusCode};

/// Defines a label enum with its wire values and the full vocabulary.
macro_rules! label_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const VALUES: &'static [&'static str] = &[$($value),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

label_enum!(
    /// HTTP method; anything non-standard collapses to `other`.
    HttpMethod {
        Get => "GET",
        Post => "POST",
        Put => "PUT",
        Patch => "PATCH",
        Delete => "DELETE",
        Head => "HEAD",
        Options => "OPTIONS",
        Other => "other",
    }
);

impl From<&Method> for HttpMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => HttpMethod::Get,
            Method::POST => HttpMethod::Post,
            Method::PUT => HttpMethod::Put,
            Method::PATCH => HttpMethod::Patch,
            Method::DELETE => HttpMethod::Delete,
            Method::HEAD => HttpMethod::Head,
            Method::OPTIONS => HttpMethod::Options,
            _ => HttpMethod::Other,
        }
    }
}

label_enum!(
    /// Route templates served anywhere in the mesh. Routers register paths
    /// through [`Route::template`] so the two can never drift apart.
    Route {
        Health => "/health",
        Metrics => "/metrics",
        GatewayUser => "/api/v1/users/{id}",
        GatewayOrders => "/api/v1/orders",
        Users => "/users",
        User => "/users/{id}",
        Orders => "/orders",
        Order => "/orders/{id}",
        Notify => "/notify",
        Email => "/email",
        Sms => "/sms",
        Unmatched => "unmatched",
    }
);

impl Route {
    pub fn template(&self) -> &'static str {
        self.as_str()
    }

    /// Map a matched router path back to its label; unknown paths are `Unmatched`.
    pub fn from_template(template: &str) -> Self {
        Route::ALL
            .iter()
            .copied()
            .find(|route| *route != Route::Unmatched && route.template() == template)
            .unwrap_or(Route::Unmatched)
    }

    /// Route of a request that already went through the router.
    pub fn of<B>(request: &Request<B>) -> Self {
        request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| Route::from_template(path.as_str()))
            .unwrap_or(Route::Unmatched)
    }
}

label_enum!(
    StatusClass {
        Informational => "1xx",
        Success => "2xx",
        Redirection => "3xx",
        ClientError => "4xx",
        ServerError => "5xx",
    }
);

impl From<StatusCode> for StatusClass {
    fn from(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

label_enum!(
    /// Domain operations performed by the services.
    Operation {
        GetUser => "get_user",
        ListUsers => "get_all_users",
        CreateUser => "create_user",
        ListOrders => "get_orders",
        CreateOrder => "create_order",
        GetOrder => "get_order",
        SendNotification => "send_notification",
        SendEmail => "send_email",
        SendSms => "send_sms",
        GatewayGetUser => "gateway_get_user",
        GatewayPlaceOrder => "gateway_place_order",
        GatewayListOrders => "gateway_list_orders",
    }
);

label_enum!(
    Outcome {
        Success => "success",
        Error => "error",
        NotFound => "not_found",
    }
);

label_enum!(
    /// Downstream services a hop can target.
    Downstream {
        UserService => "user-service",
        OrderService => "order-service",
        NotificationService => "notification-service",
    }
);

label_enum!(
    /// Result of one outbound hop.
    CallOutcome {
        Success => "success",
        Failed => "failed",
        TimedOut => "timed_out",
    }
);

label_enum!(
    NotificationKind {
        Email => "email",
        Sms => "sms",
        Push => "push",
    }
);

label_enum!(
    DeliveryStatus {
        Sent => "sent",
        Failed => "failed",
    }
);

label_enum!(
    ExportOutcome {
        Success => "success",
        Failed => "failed",
    }
);

/// Allowed values for `key` on `metric`, or `None` if the pair is not declared.
pub fn vocabulary(metric: &str, key: &str) -> Option<&'static [&'static str]> {
    use crate::observability::metrics::names;

    let values = match (metric, key) {
        (names::HTTP_REQUESTS_TOTAL | names::HTTP_REQUEST_DURATION, "method") => HttpMethod::VALUES,
        (names::HTTP_REQUESTS_TOTAL | names::HTTP_REQUEST_DURATION, "route") => Route::VALUES,
        (names::HTTP_REQUESTS_TOTAL, "status_class") => StatusClass::VALUES,
        (names::DOMAIN_OPERATIONS_TOTAL, "operation") => Operation::VALUES,
        (names::DOMAIN_OPERATIONS_TOTAL, "outcome") => Outcome::VALUES,
        (names::DOWNSTREAM_CALLS_TOTAL, "service") => Downstream::VALUES,
        (names::DOWNSTREAM_CALLS_TOTAL, "outcome") => CallOutcome::VALUES,
        (names::NOTIFICATIONS_SENT_TOTAL, "kind") => NotificationKind::VALUES,
        (names::NOTIFICATIONS_SENT_TOTAL, "status") => DeliveryStatus::VALUES,
        (names::SPAN_EXPORTS_TOTAL, "outcome") => ExportOutcome::VALUES,
        _ => return None,
    };
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_lookup() {
        assert_eq!(Route::from_template("/users/{id}"), Route::User);
        assert_eq!(Route::from_template("/api/v1/orders"), Route::GatewayOrders);
        assert_eq!(Route::from_template("/users/42"), Route::Unmatched);
        assert_eq!(Route::from_template("unmatched"), Route::Unmatched);
    }

    #[test]
    fn test_method_collapse() {
        assert_eq!(HttpMethod::from(&Method::POST).as_str(), "POST");
        let custom = Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(HttpMethod::from(&custom), HttpMethod::Other);
    }

    #[test]
    fn test_status_class() {
        assert_eq!(StatusClass::from(StatusCode::CREATED), StatusClass::Success);
        assert_eq!(StatusClass::from(StatusCode::NOT_FOUND), StatusClass::ClientError);
        assert_eq!(StatusClass::from(StatusCode::GATEWAY_TIMEOUT), StatusClass::ServerError);
    }

    #[test]
    fn test_vocabulary_lookup() {
        assert_eq!(
            vocabulary("domain_operations_total", "outcome"),
            Some(&["success", "error", "not_found"][..])
        );
        assert!(vocabulary("http_requests_total", "path").is_none());
    }
}
