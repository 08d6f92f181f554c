pub mod abandoned_cart;
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_response;
pub mod payment_session;

pub use abandoned_cart::Entity as AbandonedCart;
pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment_response::Entity as PaymentResponse;
pub use payment_session::Entity as PaymentSession;

pub use cart::Model as CartModel;
pub use cart_item::Model as CartItemModel;
pub use order::Model as OrderModel;
pub use order_item::Model as OrderItemModel;
